//! Logical folder names and their provider-specific spellings.

pub const INBOX: &str = "INBOX";
pub const SENT: &str = "Sent";
pub const TRASH: &str = "TRASH";

/// Remote names tried for the logical Sent folder, in order: generic IMAP,
/// Exchange/Outlook, then servers using a dotted hierarchy under INBOX.
const SENT_CANDIDATES: [&str; 3] = ["Sent", "Sent Items", "INBOX.Sent"];

/// Ordered list of remote folder names to try for a logical folder.
pub fn resolve(logical: &str) -> Vec<String> {
    if logical == SENT {
        SENT_CANDIDATES.iter().map(|name| name.to_string()).collect()
    } else {
        vec![logical.to_string()]
    }
}

/// Map user input onto the logical spelling used at the API boundary.
pub fn canonicalize(folder: &str) -> String {
    match folder.to_lowercase().as_str() {
        "inbox" => INBOX.to_string(),
        "sent" => SENT.to_string(),
        "trash" => TRASH.to_string(),
        _ => folder.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sent_candidates_in_fixed_order() {
        assert_eq!(resolve("Sent"), vec!["Sent", "Sent Items", "INBOX.Sent"]);
    }

    #[test]
    fn test_other_folders_have_no_fallback() {
        assert_eq!(resolve("INBOX"), vec!["INBOX"]);
        assert_eq!(resolve("TRASH"), vec!["TRASH"]);
        assert_eq!(resolve("Projects/2024"), vec!["Projects/2024"]);
    }

    #[test]
    fn test_resolution_is_case_sensitive() {
        // Callers canonicalize first; raw "SENT" is a literal folder name
        assert_eq!(resolve("SENT"), vec!["SENT"]);
        assert_eq!(resolve(&canonicalize("SENT")), resolve("Sent"));
    }

    #[test]
    fn test_canonicalize_known_names() {
        assert_eq!(canonicalize("inbox"), "INBOX");
        assert_eq!(canonicalize("SENT"), "Sent");
        assert_eq!(canonicalize("Trash"), "TRASH");
        assert_eq!(canonicalize("Archive"), "Archive");
    }
}
