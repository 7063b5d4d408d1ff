//! Endpoint cost catalog
//!
//! Static table mapping namespaced endpoint identifiers (`resource.action`)
//! to an estimated per-call cost in dollars, plus a parallel HTTP-method
//! table used for display and ledger entries. The method is descriptive
//! only and never sent on the wire.
//!
//! Costs are estimates of what a metered API plan charges per call, not
//! billing-grade numbers. Endpoints missing from the table fall back to
//! [`DEFAULT_COST`], the same magnitude as the cheapest metadata reads.

/// Estimated cost applied to endpoints missing from the catalog.
pub const DEFAULT_COST: f64 = 0.001;

/// (endpoint id, HTTP method, estimated cost in dollars)
const ENDPOINTS: &[(&str, &str, f64)] = &[
    ("posts.create", "POST", 0.01),
    ("posts.delete", "DELETE", 0.005),
    ("posts.get", "GET", 0.005),
    ("posts.search", "GET", 0.01),
    ("timeline.home", "GET", 0.01),
    ("timeline.user", "GET", 0.01),
    ("users.me", "GET", 0.001),
    ("users.lookup", "GET", 0.001),
    ("users.follow", "POST", 0.005),
    ("users.unfollow", "DELETE", 0.005),
    ("dm.send", "POST", 0.01),
    ("dm.list", "GET", 0.005),
    ("lists.list", "GET", 0.001),
    ("lists.create", "POST", 0.005),
    ("trends.get", "GET", 0.001),
    ("media.upload", "POST", 0.02),
];

/// Estimated cost for one call to `endpoint`.
pub fn cost_for(endpoint: &str) -> f64 {
    ENDPOINTS
        .iter()
        .find(|(id, _, _)| *id == endpoint)
        .map(|(_, _, cost)| *cost)
        .unwrap_or(DEFAULT_COST)
}

/// HTTP method associated with `endpoint`, for display. Unmapped
/// endpoints read as GET.
pub fn method_for(endpoint: &str) -> &'static str {
    ENDPOINTS
        .iter()
        .find(|(id, _, _)| *id == endpoint)
        .map(|(_, method, _)| *method)
        .unwrap_or("GET")
}

/// Render a dollar amount without trailing zero noise: `$0.01`, `$0.005`,
/// `$5`. Four decimal places of precision, matching the smallest cost
/// step in the catalog.
pub fn format_usd(amount: f64) -> String {
    // Summing an empty ledger yields -0.0; render it as plain zero.
    let amount = if amount == 0.0 { 0.0 } else { amount };
    let mut rendered = format!("{:.4}", amount);
    if rendered.contains('.') {
        while rendered.ends_with('0') {
            rendered.pop();
        }
        if rendered.ends_with('.') {
            rendered.pop();
        }
    }
    format!("${}", rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_for_known_endpoints() {
        assert_eq!(cost_for("posts.create"), 0.01);
        assert_eq!(cost_for("posts.delete"), 0.005);
        assert_eq!(cost_for("users.me"), 0.001);
        assert_eq!(cost_for("media.upload"), 0.02);
    }

    #[test]
    fn test_cost_for_unmapped_endpoint_uses_default() {
        assert_eq!(cost_for("spaces.create"), DEFAULT_COST);
        assert_eq!(cost_for(""), DEFAULT_COST);
    }

    #[test]
    fn test_method_inference() {
        assert_eq!(method_for("posts.create"), "POST");
        assert_eq!(method_for("posts.delete"), "DELETE");
        assert_eq!(method_for("timeline.home"), "GET");
        assert_eq!(method_for("not.an.endpoint"), "GET");
    }

    #[test]
    fn test_format_usd_trims_trailing_zeros() {
        assert_eq!(format_usd(0.01), "$0.01");
        assert_eq!(format_usd(0.005), "$0.005");
        assert_eq!(format_usd(0.0001), "$0.0001");
        assert_eq!(format_usd(5.0), "$5");
        assert_eq!(format_usd(12.5), "$12.5");
        assert_eq!(format_usd(0.0), "$0");
    }

    #[test]
    fn test_format_usd_negative_zero_renders_as_zero() {
        // An empty f64 sum produces -0.0.
        let empty_sum: f64 = std::iter::empty::<f64>().sum();
        assert_eq!(format_usd(empty_sum), "$0");
        assert_eq!(format_usd(-0.0), "$0");
    }

    #[test]
    fn test_format_usd_rounds_to_four_places() {
        assert_eq!(format_usd(0.123456), "$0.1235");
        assert_eq!(format_usd(1.00004), "$1");
    }

    #[test]
    fn test_every_catalog_entry_has_positive_cost() {
        for (id, method, cost) in ENDPOINTS {
            assert!(*cost > 0.0, "{} has non-positive cost", id);
            assert!(
                matches!(*method, "GET" | "POST" | "DELETE" | "PUT"),
                "{} has unexpected method {}",
                id,
                method
            );
        }
    }
}
