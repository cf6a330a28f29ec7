//! Markdown to HTML for report prose.
//!
//! A small subset: `#`/`##`/`###` headings, `**bold**`, `*italic*`,
//! `` `code` ``, `- `/`* ` bullet lists, fenced code blocks, `---` rules and
//! paragraphs separated by blank lines. Input is HTML-escaped first, so
//! generated text can never inject markup.

/// Escape the five HTML-significant characters.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Convert markdown text to an HTML fragment.
pub fn to_html(text: &str) -> String {
    let escaped = escape_html(text);
    let mut builder = HtmlBuilder::default();
    for line in escaped.lines() {
        builder.line(line);
    }
    builder.finish()
}

#[derive(Default)]
struct HtmlBuilder {
    out: Vec<String>,
    paragraph: Vec<String>,
    list_items: Vec<String>,
    code: Option<Vec<String>>,
}

impl HtmlBuilder {
    fn line(&mut self, line: &str) {
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            match self.code.take() {
                Some(lines) => self.out.push(format!("<pre><code>{}</code></pre>", lines.join("\n"))),
                None => {
                    self.flush();
                    self.code = Some(Vec::new());
                }
            }
            return;
        }
        if let Some(code) = self.code.as_mut() {
            code.push(line.to_string());
            return;
        }

        if trimmed.is_empty() {
            self.flush();
            return;
        }
        if trimmed == "---" || trimmed == "***" || trimmed == "___" {
            self.flush();
            self.out.push("<hr>".to_string());
            return;
        }
        if let Some((level, heading)) = parse_heading(trimmed) {
            self.flush();
            self.out
                .push(format!("<h{level}>{}</h{level}>", render_inline(heading)));
            return;
        }
        if let Some(item) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
        {
            self.flush_paragraph();
            self.list_items.push(format!("<li>{}</li>", render_inline(item.trim())));
            return;
        }

        self.flush_list();
        self.paragraph.push(render_inline(trimmed));
    }

    fn flush_paragraph(&mut self) {
        if !self.paragraph.is_empty() {
            let body = self.paragraph.join("\n");
            self.paragraph.clear();
            self.out.push(format!("<p>{body}</p>"));
        }
    }

    fn flush_list(&mut self) {
        if !self.list_items.is_empty() {
            let items = self.list_items.concat();
            self.list_items.clear();
            self.out.push(format!("<ul>{items}</ul>"));
        }
    }

    fn flush(&mut self) {
        self.flush_paragraph();
        self.flush_list();
    }

    fn finish(mut self) -> String {
        // an unclosed fence still renders its contents
        if let Some(lines) = self.code.take() {
            self.out.push(format!("<pre><code>{}</code></pre>", lines.join("\n")));
        }
        self.flush();
        self.out.join("\n")
    }
}

/// Parse an ATX heading (# through ###), returning its level and text.
fn parse_heading(line: &str) -> Option<(usize, &str)> {
    if let Some(rest) = line.strip_prefix("### ") {
        Some((3, rest))
    } else if let Some(rest) = line.strip_prefix("## ") {
        Some((2, rest))
    } else if let Some(rest) = line.strip_prefix("# ") {
        Some((1, rest))
    } else {
        None
    }
}

/// Apply inline formatting: **bold**, *italic* and `code`.
fn render_inline(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut output = String::with_capacity(len + 32);
    let mut i = 0;

    while i < len {
        if chars[i] == '`'
            && let Some(end) = find_char(&chars, i + 1, '`')
        {
            let inner: String = chars[i + 1..end].iter().collect();
            output.push_str(&format!("<code>{inner}</code>"));
            i = end + 1;
            continue;
        }

        if i + 1 < len
            && chars[i] == '*'
            && chars[i + 1] == '*'
            && let Some(end) = find_double_star(&chars, i + 2)
        {
            let inner: String = chars[i + 2..end].iter().collect();
            output.push_str(&format!("<strong>{}</strong>", render_inline(&inner)));
            i = end + 2;
            continue;
        }

        if chars[i] == '*'
            && i + 1 < len
            && chars[i + 1] != '*'
            && chars[i + 1] != ' '
            && let Some(end) = find_closing_single_star(&chars, i + 1)
        {
            let inner: String = chars[i + 1..end].iter().collect();
            output.push_str(&format!("<em>{inner}</em>"));
            i = end + 1;
            continue;
        }

        output.push(chars[i]);
        i += 1;
    }

    output
}

fn find_char(chars: &[char], start: usize, target: char) -> Option<usize> {
    (start..chars.len()).find(|&i| chars[i] == target)
}

/// Index of the first `*` of the closing `**`.
fn find_double_star(chars: &[char], start: usize) -> Option<usize> {
    (start..chars.len().saturating_sub(1)).find(|&i| chars[i] == '*' && chars[i + 1] == '*')
}

/// Closing `*` for italics: not preceded by a space, not part of `**`.
fn find_closing_single_star(chars: &[char], start: usize) -> Option<usize> {
    (start..chars.len()).find(|&i| {
        chars[i] == '*'
            && i > start
            && chars[i - 1] != ' '
            && chars.get(i + 1) != Some(&'*')
    })
}
