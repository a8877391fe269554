//! Email and phone extraction over footer plus main text.

use crate::document::{Contacts, MAX_EMAIL_CHARS, MAX_PHONES};
use crate::dom::DomAccess;
use crate::extract::{dedupe, or_empty};
use regex::Regex;
use std::sync::LazyLock;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email regex")
});

static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{1,4}\)[\s.-]?|\d{2,4}[\s.-])?\d{3,4}[\s.-]?\d{3,4}")
        .expect("phone regex")
});

const MIN_PHONE_DIGITS: usize = 7;

/// Scans footer and main text for contact details; `None` when nothing matched.
pub async fn extract_contacts(dom: &dyn DomAccess, main_text: &str) -> Option<Contacts> {
    let footer: Vec<String> = or_empty("footer", dom.query_all("footer").await)
        .iter()
        .filter_map(|footer| footer.text().map(str::to_string))
        .collect();
    let haystack = format!("{}\n{}", footer.join("\n"), main_text);
    let contacts = scan(&haystack);
    (!contacts.is_empty()).then_some(contacts)
}

/// Applies the email and phone patterns to `text`.
pub fn scan(text: &str) -> Contacts {
    let emails = dedupe(
        EMAIL
            .find_iter(text)
            .map(|m| m.as_str().trim_end_matches('.').to_ascii_lowercase())
            .filter(|email| email.chars().count() <= MAX_EMAIL_CHARS),
    );

    let mut phones = dedupe(
        PHONE
            .find_iter(text)
            .map(|m| m.as_str().trim().to_string())
            .filter(|phone| phone.chars().filter(char::is_ascii_digit).count() >= MIN_PHONE_DIGITS),
    );
    phones.truncate(MAX_PHONES);

    Contacts { emails, phones }
}
