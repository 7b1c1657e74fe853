use crate::models::message::{CachedEmail, Direction};

/// Truncate to `max_width` characters, ending in "..." when cut.
fn truncate(s: &str, max_width: usize) -> String {
    if s.chars().count() <= max_width {
        s.to_string()
    } else if max_width <= 3 {
        s.chars().take(max_width).collect()
    } else {
        let head: String = s.chars().take(max_width - 3).collect();
        format!("{}...", head)
    }
}

/// Display name when the sender has one, else the bare address.
fn format_sender(from: &str) -> String {
    match from.split_once(" <") {
        Some((name, _)) if !name.is_empty() => name.to_string(),
        _ => from.to_string(),
    }
}

fn format_flags(email: &CachedEmail) -> String {
    let mut flags = String::new();
    if !email.is_read {
        flags.push('●');
    }
    if email.has_attachments {
        flags.push('@');
    }
    if email.direction == Direction::Outbound {
        flags.push('→');
    }
    flags
}

pub fn format_email_table(
    account: &str,
    folder: &str,
    emails: &[CachedEmail],
    sync_error: Option<&str>,
) -> String {
    let mut output = String::new();

    output.push_str(&format!("{}/{} ({} messages)\n", account, folder, emails.len()));
    if let Some(error) = sync_error {
        output.push_str(&format!("sync failed, showing cached mail: {}\n", error));
    }

    if emails.is_empty() {
        output.push_str("No messages found.\n");
        return output;
    }

    let uid_width = 7;
    let flags_width = 3;
    let date_width = 11;
    let from_width = 24;
    let subject_width = 50;

    output.push_str(&format!(
        "{:>uid_w$}  {:flags_w$}  {:date_w$}  {:from_w$}  {}\n",
        "UID",
        "",
        "DATE",
        "FROM",
        "SUBJECT",
        uid_w = uid_width,
        flags_w = flags_width,
        date_w = date_width,
        from_w = from_width,
    ));

    output.push_str(&format!(
        "{:->uid_w$}  {:->flags_w$}  {:->date_w$}  {:->from_w$}  {:->subj_w$}\n",
        "",
        "",
        "",
        "",
        "",
        uid_w = uid_width,
        flags_w = flags_width,
        date_w = date_width,
        from_w = from_width,
        subj_w = subject_width,
    ));

    for email in emails {
        output.push_str(&format!(
            "{:>uid_w$}  {:flags_w$}  {:date_w$}  {:from_w$}  {}\n",
            email.uid,
            format_flags(email),
            email.date.format("%m/%d %H:%M").to_string(),
            truncate(&format_sender(&email.from), from_width),
            truncate(&email.subject, subject_width),
            uid_w = uid_width,
            flags_w = flags_width,
            date_w = date_width,
            from_w = from_width,
        ));
    }

    output
}

pub fn print_email_table(account: &str, folder: &str, emails: &[CachedEmail], sync_error: Option<&str>) {
    print!("{}", format_email_table(account, folder, emails, sync_error));
}
