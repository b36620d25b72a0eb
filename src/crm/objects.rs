/// CRM API path segment for a HubSpot object type.
///
/// Accepts the singular forms HubSpot sends in workflow payloads and field
/// options (`CONTACT`, `Company`, `deal`, ...) in any case. Unknown types
/// are lower-cased and pluralized with a trailing `s`; values that already
/// name a plural pass through.
pub fn api_object_type(object_type: &str) -> String {
    let lower = object_type.trim().to_ascii_lowercase();
    match lower.as_str() {
        "company" | "companies" => "companies".into(),
        "contact" | "contacts" => "contacts".into(),
        "deal" | "deals" => "deals".into(),
        "ticket" | "tickets" => "tickets".into(),
        _ if lower.ends_with('s') => lower,
        _ => format!("{lower}s"),
    }
}

/// Object types offered when a field-options request names none.
pub const DEFAULT_OPTION_OBJECTS: [&str; 4] = ["Company", "Contact", "Deal", "Ticket"];

/// Whether `object_type` is one of the four types the option fetchers know.
pub fn is_known_object(object_type: &str) -> bool {
    matches!(
        object_type.trim().to_ascii_lowercase().as_str(),
        "company" | "contact" | "deal" | "ticket"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_types_any_case() {
        assert_eq!(api_object_type("Company"), "companies");
        assert_eq!(api_object_type("COMPANY"), "companies");
        assert_eq!(api_object_type("contact"), "contacts");
        assert_eq!(api_object_type("DEAL"), "deals");
        assert_eq!(api_object_type("Ticket"), "tickets");
    }

    #[test]
    fn test_unknown_types_pluralize() {
        assert_eq!(api_object_type("LINE_ITEM"), "line_items");
        assert_eq!(api_object_type("products"), "products");
    }

    #[test]
    fn test_known_object() {
        assert!(is_known_object("Deal"));
        assert!(!is_known_object("line_item"));
    }
}
