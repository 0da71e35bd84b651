//! SNI → on-disk cache key derivation (§4.D). Collapses every subdomain of
//! a registrable domain onto one leaf certificate (`ads.example.com` and
//! `cdn.example.com` both resolve to `_example.com`) while leaving bare
//! IPv4 literals used as SNI alone.

/// Derive the cache key for hostname `sni` per §4.D's dot-count rule.
pub fn store_key(sni: &str) -> String {
    let dot_count = sni.matches('.').count();
    let tld = sni.rsplit('.').next().unwrap_or("");
    let looks_like_ipv4 = dot_count == 3 && tld.parse::<u64>().is_ok();

    if dot_count > 1 && !looks_like_ipv4 {
        let first_dot = sni.find('.').expect("dot_count > 1 implies a '.' exists");
        format!("_{}", &sni[first_dot + 1..])
    } else {
        sni.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdomain_collapses_to_registrable_domain() {
        assert_eq!(store_key("ads.example.com"), "_example.com");
    }

    #[test]
    fn deeper_subdomain_collapses_to_last_two_labels() {
        assert_eq!(store_key("a.ads.example.com"), "_ads.example.com");
    }

    #[test]
    fn ipv4_literal_with_three_dots_is_left_unchanged() {
        assert_eq!(store_key("a.b.c.1"), "a.b.c.1");
    }

    #[test]
    fn four_label_host_whose_tld_is_not_numeric_still_collapses() {
        assert_eq!(store_key("a.b.c.example"), "_b.c.example");
    }

    #[test]
    fn bare_registrable_domain_is_unchanged() {
        assert_eq!(store_key("example.com"), "example.com");
    }

    #[test]
    fn single_label_is_unchanged() {
        assert_eq!(store_key("localhost"), "localhost");
    }
}
