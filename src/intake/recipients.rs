//! Candidate mailbox names for an inbound message.

/// Mailbox name for a recipient address: the text before the last `@`,
/// without angle brackets, lowercased.
///
/// Returns `None` when nothing is left.
pub fn mailbox_name(address: &str) -> Option<String> {
    let address = address
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim();
    let local = match address.rfind('@') {
        Some(at) => &address[..at],
        None => address,
    };
    let local = local.trim().to_lowercase();
    if local.is_empty() {
        None
    } else {
        Some(local)
    }
}

/// Distinct mailbox names from the `To` header and the envelope, in first
/// seen order (`To` first).
pub fn candidate_mailboxes<'a>(
    header_to: impl IntoIterator<Item = &'a str>,
    envelope: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in header_to
        .into_iter()
        .chain(envelope)
        .filter_map(mailbox_name)
    {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_name() {
        assert_eq!(mailbox_name("Box@Mail.Test").as_deref(), Some("box"));
        assert_eq!(mailbox_name("<box@mail.test>").as_deref(), Some("box"));
        assert_eq!(mailbox_name("box").as_deref(), Some("box"));
        assert_eq!(mailbox_name("\"a@b\"@mail.test").as_deref(), Some("\"a@b\""));
        assert_eq!(mailbox_name("@mail.test"), None);
        assert_eq!(mailbox_name("<>"), None);
    }

    #[test]
    fn test_candidates_are_deduplicated() {
        let names = candidate_mailboxes(
            ["Box@mail.test", "other@mail.test"],
            ["<box@mail.test>", "hidden@mail.test"],
        );
        assert_eq!(names, vec!["box", "other", "hidden"]);
    }

    #[test]
    fn test_envelope_only() {
        let names = candidate_mailboxes([], ["<x@mail.test>"]);
        assert_eq!(names, vec!["x"]);
    }
}
