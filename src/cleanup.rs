use ::std::sync::LazyLock;
use regex::Regex;

static URLS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[hw]((ttps?://(www\.)?)|ww\.)([^\s/?.#-]+\.?)+(/\S*)?")
        .expect("static regex")
});
static EMAILS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-zA-Z0-9.!$%&’+_`-]+@[A-Za-z0-9.-]+\.[A-Za-z0-9-]{2,64}")
        .expect("static regex")
});
static COM_DOMAINS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z0-9-]+\.)+com(/\S*|[^\pL])").expect("static regex")
});
static CODES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-zA-Z]*\d+[a-zA-Z0-9]*").expect("static regex")
});

/// Removes parts of a text that are noise for language detection:
/// urls, emails, `.com` domains, and alphanumerical or number codes
pub fn cleanup_text(text: &str) -> String {
    let text = URLS.replace_all(text, " ");
    let text = EMAILS.replace_all(&text, " ");
    let text = COM_DOMAINS.replace_all(&text, " ");
    let text = CODES.replace_all(&text, " ");
    text.trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[test]
    fn test_cleanup_removes_everything() {
        let text = "https://www.google.com/\n\
                    mail@gmail.com\n\
                    google.com/search?q=search&source=hp\n\
                    12345 A12345\n";
        assert_eq!(cleanup_text(text), "");
    }

    #[rstest(
        text,
        expected,
        case("visit www.example.org today", "visit   today"),
        case("write to me: joe.doe@mail.net please", "write to me:   please"),
        case("order X12 and 345", "order   and"),
        case("nothing to clean", "nothing to clean")
    )]
    fn test_cleanup(text: &str, expected: &str) {
        assert_eq!(cleanup_text(text), expected);
    }

    #[rstest(
        text,
        case("https://www.google.com/ hola amigo"),
        case("Contact: a.b@c.de or see example.com/about, 2024 edition"),
        case("mixed h2o www.x.com 12abc words")
    )]
    fn test_cleanup_idempotent(text: &str) {
        let once = cleanup_text(text);
        assert_eq!(cleanup_text(&once), once);
    }
}
