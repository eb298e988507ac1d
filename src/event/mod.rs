//! Event module
//!
//! Immutable records of single state transitions, and the lifecycle that
//! applies them to their aggregate.

mod record;

pub use record::{Event, EventState};

/// Underscored event name, e.g. `Post::TitleChanged` → `post/title_changed`.
pub fn event_name(event_type: &str) -> String {
    event_type
        .split("::")
        .filter(|segment| !segment.is_empty())
        .map(underscore)
        .collect::<Vec<_>>()
        .join("/")
}

/// `TitleChanged` → `title_changed`, `HTMLBody` → `html_body`
pub(crate) fn underscore(word: &str) -> String {
    let chars: Vec<char> = word.chars().collect();
    let mut out = String::with_capacity(word.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(char::is_lowercase),
                _ => false,
            };
            if boundary {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    out
}

/// `title` → `Title`, `due_date` → `DueDate`
pub(crate) fn camelize(word: &str) -> String {
    word.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name() {
        assert_eq!(event_name("Post::TitleChanged"), "post/title_changed");
        assert_eq!(event_name("Billing::Invoice::DueDateChanged"), "billing/invoice/due_date_changed");
        assert_eq!(event_name("HTMLBodyChanged"), "html_body_changed");
    }

    #[test]
    fn test_camelize() {
        assert_eq!(camelize("title"), "Title");
        assert_eq!(camelize("due_date"), "DueDate");
        assert_eq!(camelize("owner_id"), "OwnerId");
    }
}
