//! Markdown-to-HTML rendering of model replies.
//!
//! A pure string transform: it knows nothing about chunks or transports and
//! is applied to already reassembled text. Covers the subset models actually
//! emit: fenced code, headings, bullet and numbered lists, block quotes,
//! paragraphs, and inline code, bold, italic and links.

/// Render markdown text as an HTML fragment.
pub fn markdown_to_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    let mut block = Block::None;
    let mut paragraph: Vec<&str> = Vec::new();
    let mut code_lang = String::new();
    let mut code_lines: Vec<&str> = Vec::new();
    let mut in_code = false;

    for line in text.lines() {
        if in_code {
            if line.trim_start().starts_with("```") {
                out.push_str(&render_code(&code_lang, &code_lines));
                code_lines.clear();
                in_code = false;
            } else {
                code_lines.push(line);
            }
            continue;
        }

        let trimmed = line.trim();

        if let Some(lang) = trimmed.strip_prefix("```") {
            flush_paragraph(&mut out, &mut paragraph);
            close_block(&mut out, &mut block);
            code_lang = lang.trim().to_string();
            in_code = true;
            continue;
        }

        if trimmed.is_empty() {
            flush_paragraph(&mut out, &mut paragraph);
            close_block(&mut out, &mut block);
            continue;
        }

        if let Some((level, title)) = heading(trimmed) {
            flush_paragraph(&mut out, &mut paragraph);
            close_block(&mut out, &mut block);
            out.push_str(&format!("<h{level}>{}</h{level}>\n", render_inline(title)));
            continue;
        }

        if let Some(item) = bullet_item(trimmed) {
            flush_paragraph(&mut out, &mut paragraph);
            open_block(&mut out, &mut block, Block::Bullets);
            out.push_str(&format!("<li>{}</li>\n", render_inline(item)));
            continue;
        }

        if let Some(item) = numbered_item(trimmed) {
            flush_paragraph(&mut out, &mut paragraph);
            open_block(&mut out, &mut block, Block::Numbers);
            out.push_str(&format!("<li>{}</li>\n", render_inline(item)));
            continue;
        }

        if let Some(quote) = trimmed.strip_prefix('>') {
            flush_paragraph(&mut out, &mut paragraph);
            open_block(&mut out, &mut block, Block::Quote);
            out.push_str(&format!("<p>{}</p>\n", render_inline(quote.trim_start())));
            continue;
        }

        close_block(&mut out, &mut block);
        paragraph.push(trimmed);
    }

    // Unterminated fence: render what arrived.
    if in_code {
        out.push_str(&render_code(&code_lang, &code_lines));
    }
    flush_paragraph(&mut out, &mut paragraph);
    close_block(&mut out, &mut block);

    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    None,
    Bullets,
    Numbers,
    Quote,
}

fn open_block(out: &mut String, block: &mut Block, wanted: Block) {
    if *block == wanted {
        return;
    }
    close_block(out, block);
    out.push_str(match wanted {
        Block::Bullets => "<ul>\n",
        Block::Numbers => "<ol>\n",
        Block::Quote => "<blockquote>\n",
        Block::None => "",
    });
    *block = wanted;
}

fn close_block(out: &mut String, block: &mut Block) {
    out.push_str(match block {
        Block::Bullets => "</ul>\n",
        Block::Numbers => "</ol>\n",
        Block::Quote => "</blockquote>\n",
        Block::None => "",
    });
    *block = Block::None;
}

fn flush_paragraph(out: &mut String, paragraph: &mut Vec<&str>) {
    if paragraph.is_empty() {
        return;
    }
    let joined = paragraph.join("\n");
    out.push_str(&format!("<p>{}</p>\n", render_inline(&joined).replace('\n', "<br>\n")));
    paragraph.clear();
}

fn render_code(lang: &str, lines: &[&str]) -> String {
    let body = escape_html(&lines.join("\n"));
    if lang.is_empty() {
        format!("<pre><code>{}</code></pre>\n", body)
    } else {
        format!(
            "<pre><code class=\"language-{}\">{}</code></pre>\n",
            escape_html(lang),
            body
        )
    }
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    rest.strip_prefix(' ').map(|title| (level, title.trim()))
}

fn bullet_item(line: &str) -> Option<&str> {
    line.strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("+ "))
}

fn numbered_item(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    line[digits..].strip_prefix(". ")
}

/// Escape the five HTML-significant characters.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Inline spans: `code`, **bold**, *italic*, [text](url).
fn render_inline(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('`') {
            if let Some(end) = after.find('`') {
                out.push_str(&format!("<code>{}</code>", escape_html(&after[..end])));
                rest = &after[end + 1..];
                continue;
            }
        }
        if let Some(after) = rest.strip_prefix("**") {
            if let Some(end) = after.find("**") {
                if end > 0 {
                    out.push_str(&format!("<strong>{}</strong>", render_inline(&after[..end])));
                    rest = &after[end + 2..];
                    continue;
                }
            }
        }
        if let Some(after) = rest.strip_prefix('*') {
            if let Some(end) = after.find('*') {
                if end > 0 && !after.starts_with(' ') {
                    out.push_str(&format!("<em>{}</em>", render_inline(&after[..end])));
                    rest = &after[end + 1..];
                    continue;
                }
            }
        }
        if let Some(after) = rest.strip_prefix('[') {
            if let Some((label, url, consumed)) = link(after) {
                if safe_scheme(url) {
                    out.push_str(&format!(
                        "<a href=\"{}\">{}</a>",
                        escape_html(url),
                        render_inline(label)
                    ));
                } else {
                    out.push_str(&render_inline(label));
                }
                rest = &after[consumed..];
                continue;
            }
        }

        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push_str(&escape_html(c.encode_utf8(&mut [0u8; 4])));
        }
        rest = chars.as_str();
    }

    out
}

fn safe_scheme(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    ["http://", "https://", "mailto:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

/// Parse `label](url)` after an opening bracket; returns bytes consumed.
fn link(after_bracket: &str) -> Option<(&str, &str, usize)> {
    let close = after_bracket.find("](")?;
    let label = &after_bracket[..close];
    let url_start = close + 2;
    let url_len = after_bracket[url_start..].find(')')?;
    let url = &after_bracket[url_start..url_start + url_len];
    if url.contains(char::is_whitespace) {
        return None;
    }
    Some((label, url, url_start + url_len + 1))
}
