//! Parsing model replies and checking them against the response format.
//!
//! The model answers in free text with XML-style tags:
//!
//! | Tag | Kind |
//! |-----|------|
//! | `<TmuxSendKeys>` | action, repeatable |
//! | `<ExecCommand>` | action, repeatable |
//! | `<PasteMultilineContent>` | action |
//! | `<RequestAccomplished>` | flag |
//! | `<ExecPaneSeemsBusy>` | flag |
//! | `<WaitingForUserResponse>` | flag |
//! | `<NoComment>` | flag |
//!
//! Whatever remains outside the tags is the message shown to the user.

use std::sync::LazyLock;

use regex::Regex;

static OPEN_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"<(TmuxSendKeys|ExecCommand|PasteMultilineContent|RequestAccomplished|ExecPaneSeemsBusy|WaitingForUserResponse|NoComment)>",
    )
    .expect("valid tag regex")
});

/// A parsed model reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AiResponse {
    pub message: String,
    pub send_keys: Vec<String>,
    pub exec_command: Vec<String>,
    pub paste_multiline_content: String,
    pub request_accomplished: bool,
    pub exec_pane_seems_busy: bool,
    pub waiting_for_user_response: bool,
    pub no_comment: bool,
}

impl AiResponse {
    /// Number of boolean flags set.
    pub fn flag_count(&self) -> usize {
        [
            self.request_accomplished,
            self.exec_pane_seems_busy,
            self.waiting_for_user_response,
            self.no_comment,
        ]
        .into_iter()
        .filter(|f| *f)
        .count()
    }

    /// Number of action categories with content.
    pub fn category_count(&self) -> usize {
        [
            !self.exec_command.is_empty(),
            !self.send_keys.is_empty(),
            !self.paste_multiline_content.is_empty(),
        ]
        .into_iter()
        .filter(|c| *c)
        .count()
    }
}

/// A breach of the response format, fed back to the model verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuidelineViolation {
    MultipleFlags,
    MultipleCategories,
    NoTags,
}

impl GuidelineViolation {
    pub fn message(self) -> &'static str {
        match self {
            GuidelineViolation::MultipleFlags => {
                "You didn't follow the guidelines. Only one boolean flag should be set to true in your response. Pay attention!"
            }
            GuidelineViolation::MultipleCategories => {
                "You didn't follow the guidelines. You can only use one type of XML tag in your response. Pay attention!"
            }
            GuidelineViolation::NoTags => {
                "You didn't follow the guidelines. You must use at least one XML tag in your response. Pay attention!"
            }
        }
    }
}

impl std::fmt::Display for GuidelineViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Check the one-flag, one-category rule. Outside watch mode a reply must
/// also carry at least one tag.
pub fn check_guidelines(r: &AiResponse, watch_mode: bool) -> Result<(), GuidelineViolation> {
    let flags = r.flag_count();
    if flags > 1 {
        return Err(GuidelineViolation::MultipleFlags);
    }
    let categories = r.category_count();
    if categories > 1 {
        return Err(GuidelineViolation::MultipleCategories);
    }
    if !watch_mode && flags + categories == 0 {
        return Err(GuidelineViolation::NoTags);
    }
    Ok(())
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true")
}

/// Extract tags and the remaining message from a model reply.
pub fn parse_response(text: &str) -> Result<AiResponse, String> {
    let mut response = AiResponse::default();
    let mut message = String::new();
    let mut cursor = 0;

    while let Some(open) = OPEN_TAG_RE.captures_at(text, cursor) {
        let (Some(whole), Some(name)) = (open.get(0), open.get(1)) else {
            break;
        };
        message.push_str(text.get(cursor..whole.start()).unwrap_or_default());

        let name = name.as_str();
        let close = format!("</{name}>");
        let body_start = whole.end();
        let rest = text.get(body_start..).unwrap_or_default();
        let Some(body_len) = rest.find(&close) else {
            return Err(format!("unclosed <{name}> tag"));
        };
        let body = rest.get(..body_len).unwrap_or_default().trim();

        match name {
            "TmuxSendKeys" => response.send_keys.push(body.to_string()),
            "ExecCommand" => response.exec_command.push(body.to_string()),
            "PasteMultilineContent" => response.paste_multiline_content = body.to_string(),
            "RequestAccomplished" => response.request_accomplished = is_truthy(body),
            "ExecPaneSeemsBusy" => response.exec_pane_seems_busy = is_truthy(body),
            "WaitingForUserResponse" => response.waiting_for_user_response = is_truthy(body),
            "NoComment" => response.no_comment = is_truthy(body),
            _ => {}
        }
        cursor = body_start + body_len + close.len();
    }
    message.push_str(text.get(cursor..).unwrap_or_default());

    response.send_keys.retain(|k| !k.is_empty());
    response.exec_command.retain(|c| !c.is_empty());
    response.message = message.trim().to_string();
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_and_exec_command() {
        let r = parse_response("Listing files now.\n<ExecCommand>ls -la</ExecCommand>\n").unwrap();
        assert_eq!(r.message, "Listing files now.");
        assert_eq!(r.exec_command, vec!["ls -la"]);
        assert_eq!(r.flag_count(), 0);
        assert_eq!(r.category_count(), 1);
    }

    #[test]
    fn send_keys_accumulate_in_order() {
        let r = parse_response(
            "<TmuxSendKeys>:wq</TmuxSendKeys>\n<TmuxSendKeys>Enter</TmuxSendKeys>",
        )
        .unwrap();
        assert_eq!(r.send_keys, vec![":wq", "Enter"]);
        assert!(r.message.is_empty());
    }

    #[test]
    fn paste_keeps_inner_newlines() {
        let r = parse_response(
            "<PasteMultilineContent>\ndef f():\n    return 1\n</PasteMultilineContent>",
        )
        .unwrap();
        assert_eq!(r.paste_multiline_content, "def f():\n    return 1");
    }

    #[test]
    fn flags_accept_one_or_true() {
        let r = parse_response("Done! <RequestAccomplished>1</RequestAccomplished>").unwrap();
        assert!(r.request_accomplished);
        let r = parse_response("<NoComment>true</NoComment>").unwrap();
        assert!(r.no_comment);
        let r = parse_response("<ExecPaneSeemsBusy>0</ExecPaneSeemsBusy>").unwrap();
        assert!(!r.exec_pane_seems_busy);
    }

    #[test]
    fn unclosed_tag_is_an_error() {
        let err = parse_response("<ExecCommand>ls").unwrap_err();
        assert!(err.contains("ExecCommand"));
    }

    #[test]
    fn unknown_tags_stay_in_message() {
        let r = parse_response("Use <b>bold</b> text <WaitingForUserResponse>1</WaitingForUserResponse>")
            .unwrap();
        assert_eq!(r.message, "Use <b>bold</b> text");
        assert!(r.waiting_for_user_response);
    }

    #[test]
    fn guideline_checks() {
        let two_flags = AiResponse {
            request_accomplished: true,
            waiting_for_user_response: true,
            ..Default::default()
        };
        assert_eq!(
            check_guidelines(&two_flags, false),
            Err(GuidelineViolation::MultipleFlags)
        );

        let two_categories = AiResponse {
            exec_command: vec!["ls".into()],
            send_keys: vec!["q".into()],
            ..Default::default()
        };
        assert_eq!(
            check_guidelines(&two_categories, false),
            Err(GuidelineViolation::MultipleCategories)
        );

        let empty = AiResponse::default();
        assert_eq!(check_guidelines(&empty, false), Err(GuidelineViolation::NoTags));
        assert_eq!(check_guidelines(&empty, true), Ok(()));

        let ok = AiResponse {
            exec_command: vec!["ls".into(), "pwd".into()],
            ..Default::default()
        };
        assert_eq!(check_guidelines(&ok, false), Ok(()));
    }

    #[test]
    fn violation_messages_are_model_feedback() {
        assert!(
            GuidelineViolation::NoTags
                .message()
                .contains("must use at least one XML tag")
        );
    }
}
