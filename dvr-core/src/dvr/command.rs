//! Turns a recording profile's command template into an argument vector.
//!
//! The template is split into tokens first (shell-style quoting, no shell
//! evaluation) and placeholders are substituted inside each token
//! afterwards, so a resolved value can never add or split arguments.

use thiserror::Error;

pub const INPUT_PLACEHOLDER: &str = "{input}";
pub const USER_AGENT_PLACEHOLDER: &str = "{userAgent}";
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("command template is empty")]
    Empty,
    #[error("unterminated {0} quote in command template")]
    UnterminatedQuote(char),
    #[error("command template ends with a dangling escape")]
    DanglingEscape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscoderCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl TranscoderCommand {
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TemplateValues<'a> {
    pub input: &'a str,
    pub user_agent: &'a str,
    pub output: &'a str,
}

pub fn build_command(
    template: &str,
    values: TemplateValues<'_>,
) -> Result<TranscoderCommand, TemplateError> {
    let mut tokens = tokenize(template)?
        .into_iter()
        .map(|token| substitute(&token, values));
    let program = tokens.next().ok_or(TemplateError::Empty)?;
    Ok(TranscoderCommand {
        program,
        args: tokens.collect(),
    })
}

fn substitute(token: &str, values: TemplateValues<'_>) -> String {
    token
        .replace(INPUT_PLACEHOLDER, values.input)
        .replace(USER_AGENT_PLACEHOLDER, values.user_agent)
        .replace(OUTPUT_PLACEHOLDER, values.output)
}

pub fn tokenize(template: &str) -> Result<Vec<String>, TemplateError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = template.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => return Err(TemplateError::UnterminatedQuote('\'')),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\' | '$' | '`')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err(TemplateError::UnterminatedQuote('"')),
                        },
                        Some(inner) => current.push(inner),
                        None => return Err(TemplateError::UnterminatedQuote('"')),
                    }
                }
            }
            '\\' => {
                in_token = true;
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => return Err(TemplateError::DanglingEscape),
                }
            }
            ch if ch.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            other => {
                in_token = true;
                current.push(other);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// `"{job_id}_{title}.{extension}"` with every character outside
/// `[A-Za-z0-9]` in the title replaced by `_`.
pub fn output_file_name(job_id: i64, program_title: &str, extension: &str) -> String {
    let title: String = program_title
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect();
    let extension: String = extension
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .collect();
    let extension = if extension.is_empty() {
        "mp4".to_string()
    } else {
        extension
    };
    format!("{job_id}_{title}.{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> TemplateValues<'static> {
        TemplateValues {
            input: "http://example.net/live/1.ts?token=a b",
            user_agent: "VLC/3.0.20 LibVLC/3.0.20",
            output: "/rec/1_News.ts",
        }
    }

    #[test]
    fn substituted_values_stay_single_arguments() {
        let command = build_command(
            "ffmpeg -user_agent {userAgent} -i {input} -c copy {output}",
            values(),
        )
        .unwrap();
        assert_eq!(command.program, "ffmpeg");
        assert_eq!(
            command.args,
            vec![
                "-user_agent",
                "VLC/3.0.20 LibVLC/3.0.20",
                "-i",
                "http://example.net/live/1.ts?token=a b",
                "-c",
                "copy",
                "/rec/1_News.ts",
            ]
        );
    }

    #[test]
    fn quoted_placeholders_are_unwrapped() {
        let command = build_command(
            r#"ffmpeg -headers "User-Agent: {userAgent}" -i '{input}' "{output}""#,
            values(),
        )
        .unwrap();
        assert_eq!(command.args[1], "User-Agent: VLC/3.0.20 LibVLC/3.0.20");
        assert_eq!(command.args[3], "http://example.net/live/1.ts?token=a b");
        assert_eq!(command.args[4], "/rec/1_News.ts");
    }

    #[test]
    fn shell_metacharacters_in_values_are_inert() {
        let command = build_command(
            "cp {input} {output}",
            TemplateValues {
                input: "x; rm -rf /",
                user_agent: "",
                output: "$(reboot)",
            },
        )
        .unwrap();
        assert_eq!(command.args, vec!["x; rm -rf /", "$(reboot)"]);
    }

    #[test]
    fn tokenizer_handles_escapes_and_empty_quotes() {
        assert_eq!(
            tokenize(r#"sh -c 'touch "$0"; exit 3' a\ b """#).unwrap(),
            vec!["sh", "-c", r#"touch "$0"; exit 3"#, "a b", ""]
        );
        assert_eq!(
            tokenize(r#"echo "say \"hi\" \n""#).unwrap(),
            vec!["echo", r#"say "hi" \n"#]
        );
    }

    #[test]
    fn malformed_templates_are_rejected() {
        assert_eq!(
            build_command("   ", values()).unwrap_err(),
            TemplateError::Empty
        );
        assert_eq!(
            tokenize("ffmpeg -i 'x").unwrap_err(),
            TemplateError::UnterminatedQuote('\'')
        );
        assert_eq!(
            tokenize("ffmpeg -i \"x").unwrap_err(),
            TemplateError::UnterminatedQuote('"')
        );
        assert_eq!(tokenize("ffmpeg \\").unwrap_err(), TemplateError::DanglingEscape);
    }

    #[test]
    fn output_name_is_filesystem_safe() {
        assert_eq!(
            output_file_name(42, "Match: A/B — Live!", "ts"),
            "42_Match__A_B___Live_.ts"
        );
        assert_eq!(output_file_name(3, "../etc", "../mp4"), "3____etc.mp4");
        assert_eq!(output_file_name(3, "x", ""), "3_x.mp4");
    }
}
