//! SMTP command parsing.

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `HELO domain`
    Helo(String),
    /// `EHLO domain`
    Ehlo(String),
    /// `MAIL FROM:<path> [params]`; `size` is the SIZE parameter, if any.
    MailFrom { path: String, size: Option<usize> },
    /// `RCPT TO:<path> [params]`
    RcptTo(String),
    /// `DATA`
    Data,
    /// `RSET`
    Rset,
    /// `NOOP`
    Noop,
    /// `QUIT`
    Quit,
    /// `VRFY`
    Vrfy,
    /// A known verb with unusable arguments.
    Malformed(&'static str),
    /// Anything else.
    Unknown(String),
}

impl Command {
    /// Parse one command line (without the line terminator).
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (verb, rest) = match line.find(' ') {
            Some(pos) => (&line[..pos], line[pos + 1..].trim()),
            None => (line, ""),
        };

        match verb.to_ascii_uppercase().as_str() {
            "HELO" if !rest.is_empty() => Command::Helo(rest.to_string()),
            "EHLO" if !rest.is_empty() => Command::Ehlo(rest.to_string()),
            "HELO" | "EHLO" => Command::Malformed("domain required"),
            "MAIL" => match strip_keyword(rest, "FROM:") {
                Some(args) => {
                    let (path, params) = split_path(args);
                    Command::MailFrom {
                        path,
                        size: size_param(params),
                    }
                }
                None => Command::Malformed("syntax: MAIL FROM:<address>"),
            },
            "RCPT" => match strip_keyword(rest, "TO:") {
                Some(args) => {
                    let (path, _) = split_path(args);
                    if path.is_empty() {
                        Command::Malformed("recipient required")
                    } else {
                        Command::RcptTo(path)
                    }
                }
                None => Command::Malformed("syntax: RCPT TO:<address>"),
            },
            "DATA" => Command::Data,
            "RSET" => Command::Rset,
            "NOOP" => Command::Noop,
            "QUIT" => Command::Quit,
            "VRFY" => Command::Vrfy,
            _ => Command::Unknown(verb.to_string()),
        }
    }
}

/// Case-insensitively strip `keyword` from the start of `s`.
fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let head = s.get(..keyword.len())?;
    if head.eq_ignore_ascii_case(keyword) {
        Some(s[keyword.len()..].trim_start())
    } else {
        None
    }
}

/// Split `<path> params` into the bare path and the parameter string.
fn split_path(args: &str) -> (String, &str) {
    if let Some(inner) = args.strip_prefix('<') {
        if let Some(end) = inner.find('>') {
            return (inner[..end].trim().to_string(), inner[end + 1..].trim());
        }
    }
    match args.find(char::is_whitespace) {
        Some(pos) => (args[..pos].to_string(), args[pos..].trim()),
        None => (args.to_string(), ""),
    }
}

fn size_param(params: &str) -> Option<usize> {
    params.split_whitespace().find_map(|p| {
        let (key, value) = p.split_once('=')?;
        if key.eq_ignore_ascii_case("SIZE") {
            value.parse().ok()
        } else {
            None
        }
    })
}
