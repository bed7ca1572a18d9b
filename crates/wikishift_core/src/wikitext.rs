//! Span-based wikitext document model.
//!
//! A [`Document`] owns the raw page text and hands out owned views of the
//! wikilinks, template invocations and sections found in it. Every view
//! carries byte ranges into the text, so callers mutate the document by
//! splicing those ranges and re-reading the views afterwards. Nothing is
//! normalised on the way in, which is what keeps an unmodified document
//! byte-identical on the way out.

use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wikilink {
    pub span: Range<usize>,
    /// Target before any `#fragment`, whitespace-trimmed. A leading `:` is kept.
    pub title: String,
    pub title_span: Range<usize>,
    pub text: Option<String>,
    pub text_span: Option<Range<usize>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub span: Range<usize>,
    pub name: String,
    pub name_span: Range<usize>,
    pub arguments: Vec<Argument>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    /// Range of the argument including its leading `|`.
    pub span: Range<usize>,
    /// `"1"`, `"2"`, ... for positional arguments, the trimmed key otherwise.
    pub name: String,
    pub positional: bool,
    pub value: String,
    pub value_span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub level: usize,
    pub title: String,
    pub heading_span: Range<usize>,
    pub contents_span: Range<usize>,
}

impl Document {
    pub fn parse(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn to_text(&self) -> String {
        self.text.clone()
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn splice(&mut self, range: Range<usize>, replacement: &str) {
        self.text.replace_range(range, replacement);
    }

    pub fn wikilinks(&self) -> Vec<Wikilink> {
        scan(&self.text)
            .into_iter()
            .filter(|node| node.kind == NodeKind::Link)
            .map(|node| self.build_link(&node))
            .collect()
    }

    pub fn templates(&self) -> Vec<Template> {
        scan(&self.text)
            .into_iter()
            .filter(|node| node.kind == NodeKind::Template)
            .map(|node| self.build_template(&node))
            .collect()
    }

    pub fn sections(&self, level: usize) -> Vec<Section> {
        let headings = parse_headings(&self.text);
        let mut out = Vec::new();
        for (index, heading) in headings.iter().enumerate() {
            if heading.level != level {
                continue;
            }
            let end = headings[index + 1..]
                .iter()
                .find(|next| next.level <= level)
                .map(|next| next.line.start)
                .unwrap_or(self.text.len());
            out.push(Section {
                level,
                title: heading.title.clone(),
                heading_span: heading.line.clone(),
                contents_span: heading.line.end..end,
            });
        }
        out
    }

    fn build_link(&self, node: &Node) -> Wikilink {
        let inner_start = node.span.start + 2;
        let inner_end = node.span.end - 2;
        let target_end = node.pipes.first().copied().unwrap_or(inner_end);
        let target = &self.text[inner_start..target_end];
        let title_end = target
            .find('#')
            .map(|offset| inner_start + offset)
            .unwrap_or(target_end);
        let title_span = trim_range(&self.text, inner_start..title_end);

        let text_span = node.pipes.first().map(|pipe| pipe + 1..inner_end);
        Wikilink {
            span: node.span.clone(),
            title: self.text[title_span.clone()].to_string(),
            title_span,
            text: text_span
                .as_ref()
                .map(|range| self.text[range.clone()].to_string()),
            text_span,
        }
    }

    fn build_template(&self, node: &Node) -> Template {
        let inner_start = node.span.start + 2;
        let inner_end = node.span.end - 2;
        let name_end = node.pipes.first().copied().unwrap_or(inner_end);
        let name_span = inner_start..name_end;

        let mut arguments = Vec::with_capacity(node.pipes.len());
        let mut positional_index = 0usize;
        for (index, pipe) in node.pipes.iter().enumerate() {
            let segment_end = node.pipes.get(index + 1).copied().unwrap_or(inner_end);
            let equals = node
                .equals
                .iter()
                .copied()
                .find(|position| *position > *pipe && *position < segment_end);
            let argument = match equals {
                Some(equals) => Argument {
                    span: *pipe..segment_end,
                    name: self.text[pipe + 1..equals].trim().to_string(),
                    positional: false,
                    value: self.text[equals + 1..segment_end].to_string(),
                    value_span: equals + 1..segment_end,
                },
                None => {
                    positional_index += 1;
                    Argument {
                        span: *pipe..segment_end,
                        name: positional_index.to_string(),
                        positional: true,
                        value: self.text[pipe + 1..segment_end].to_string(),
                        value_span: pipe + 1..segment_end,
                    }
                }
            };
            arguments.push(argument);
        }

        Template {
            span: node.span.clone(),
            name: self.text[name_span.clone()].to_string(),
            name_span,
            arguments,
        }
    }
}

impl Template {
    /// Canonical template name: comments dropped, `Template:` prefix removed,
    /// underscores read as spaces and whitespace collapsed.
    pub fn normal_name(&self) -> String {
        normalize_template_name(&self.name)
    }

    /// MediaWiki lets the last duplicate argument win, so this does too.
    pub fn get_arg(&self, name: &str) -> Option<&Argument> {
        self.arguments.iter().rev().find(|arg| arg.name == name)
    }

    pub fn has_arg(&self, name: &str) -> bool {
        self.get_arg(name).is_some()
    }

    pub fn positional_args(&self) -> impl Iterator<Item = &Argument> {
        self.arguments.iter().filter(|arg| arg.positional)
    }

    pub fn first_named_arg(&self) -> Option<&Argument> {
        self.arguments.iter().find(|arg| !arg.positional)
    }

    /// Offset just before the closing `}}`.
    pub fn closing_offset(&self) -> usize {
        self.span.end - 2
    }
}

pub fn normalize_template_name(raw: &str) -> String {
    let without_comments = strip_comments(raw);
    let trimmed = without_comments.trim();
    let body = match trimmed.split_once(':') {
        Some((prefix, rest)) if prefix.trim().eq_ignore_ascii_case("template") => rest,
        _ => trimmed,
    };
    collapse_whitespace(&body.replace('_', " "))
}

pub fn collapse_whitespace(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut previous_was_space = false;
    for ch in value.chars() {
        if ch.is_whitespace() {
            if !previous_was_space {
                output.push(' ');
                previous_was_space = true;
            }
        } else {
            output.push(ch);
            previous_was_space = false;
        }
    }
    output.trim().to_string()
}

/// Collapse every run of three or more newlines into a single blank line.
pub fn remove_extra_newlines(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut run = 0usize;
    for ch in text.chars() {
        if ch == '\n' {
            run += 1;
            if run <= 2 {
                output.push(ch);
            }
        } else {
            run = 0;
            output.push(ch);
        }
    }
    output
}

fn strip_comments(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("<!--") {
        output.push_str(&rest[..start]);
        match rest[start + 4..].find("-->") {
            Some(end) => rest = &rest[start + 4 + end + 3..],
            None => {
                rest = "";
            }
        }
    }
    output.push_str(rest);
    output
}

fn trim_range(text: &str, range: Range<usize>) -> Range<usize> {
    let slice = &text[range.clone()];
    let leading = slice.len() - slice.trim_start().len();
    let trailing = slice.len() - slice.trim_end().len();
    if leading == slice.len() {
        return range.start..range.start;
    }
    range.start + leading..range.end - trailing
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Link,
    Template,
    Parameter,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    span: Range<usize>,
    pipes: Vec<usize>,
    equals: Vec<usize>,
}

#[derive(Debug)]
struct Opener {
    kind: NodeKind,
    start: usize,
    pipes: Vec<usize>,
    equals: Vec<usize>,
}

impl Opener {
    fn new(kind: NodeKind, start: usize) -> Self {
        Self {
            kind,
            start,
            pipes: Vec::new(),
            equals: Vec::new(),
        }
    }

    fn close(self, end: usize) -> Node {
        Node {
            kind: self.kind,
            span: self.start..end,
            pipes: self.pipes,
            equals: self.equals,
        }
    }
}

/// Single pass over the text matching `[[ ]]`, `{{ }}` and `{{{ }}}` pairs.
/// Pipes and equals signs are attributed to the innermost open construct, so
/// a `|` inside a nested link never splits the enclosing template.
fn scan(text: &str) -> Vec<Node> {
    let bytes = text.as_bytes();
    let mut nodes = Vec::new();
    let mut stack: Vec<Opener> = Vec::new();
    let mut cursor = 0usize;

    while cursor < bytes.len() {
        let rest = &bytes[cursor..];
        if rest.starts_with(b"<!--") {
            cursor = find_bytes(bytes, cursor + 4, b"-->")
                .map(|end| end + 3)
                .unwrap_or(bytes.len());
            continue;
        }
        if starts_with_ignore_case(rest, b"<nowiki>") {
            cursor = find_bytes(bytes, cursor + 8, b"</nowiki>")
                .map(|end| end + 9)
                .unwrap_or(bytes.len());
            continue;
        }
        if rest.starts_with(b"{{{") {
            stack.push(Opener::new(NodeKind::Parameter, cursor));
            cursor += 3;
            continue;
        }
        if rest.starts_with(b"{{") {
            stack.push(Opener::new(NodeKind::Template, cursor));
            cursor += 2;
            continue;
        }
        if rest.starts_with(b"[[") {
            stack.push(Opener::new(NodeKind::Link, cursor));
            cursor += 2;
            continue;
        }
        if rest.starts_with(b"}}") {
            let brace = stack.iter().rposition(|opener| opener.kind != NodeKind::Link);
            if let Some(position) = brace {
                match stack[position].kind {
                    NodeKind::Parameter if rest.starts_with(b"}}}") => {
                        stack.truncate(position);
                        cursor += 3;
                        continue;
                    }
                    NodeKind::Template => {
                        stack.truncate(position + 1);
                        if let Some(opener) = stack.pop() {
                            nodes.push(opener.close(cursor + 2));
                        }
                        cursor += 2;
                        continue;
                    }
                    _ => {}
                }
            }
            cursor += 2;
            continue;
        }
        if rest.starts_with(b"]]") {
            if stack.last().map(|opener| opener.kind) == Some(NodeKind::Link)
                && let Some(opener) = stack.pop()
            {
                nodes.push(opener.close(cursor + 2));
            }
            cursor += 2;
            continue;
        }
        match bytes[cursor] {
            b'|' => {
                if let Some(top) = stack.last_mut() {
                    top.pipes.push(cursor);
                }
            }
            b'=' => {
                if let Some(top) = stack.last_mut()
                    && top.kind == NodeKind::Template
                {
                    top.equals.push(cursor);
                }
            }
            _ => {}
        }
        cursor += 1;
    }

    nodes.sort_by_key(|node| node.span.start);
    nodes
}

fn find_bytes(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

fn starts_with_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack[..needle.len()].eq_ignore_ascii_case(needle)
}

#[derive(Debug)]
struct Heading {
    level: usize,
    title: String,
    line: Range<usize>,
}

fn parse_headings(text: &str) -> Vec<Heading> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        let start = offset;
        offset += line.len();

        let visible = strip_comments(line);
        let trimmed = visible.trim();
        if trimmed.len() < 3 || !trimmed.starts_with('=') || !trimmed.ends_with('=') {
            continue;
        }
        let leading = trimmed.chars().take_while(|ch| *ch == '=').count();
        let trailing = trimmed.chars().rev().take_while(|ch| *ch == '=').count();
        let level = leading.min(trailing);
        if !(1..=6).contains(&level) || level * 2 >= trimmed.len() {
            continue;
        }
        let title = trimmed[level..trimmed.len() - level].trim();
        if title.is_empty() {
            continue;
        }
        out.push(Heading {
            level,
            title: title.to_string(),
            line: start..offset,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{Document, normalize_template_name, remove_extra_newlines};

    const ENTRY: &str = "==English==\n===Noun===\n{{en-noun}}\n\n# A [[canine]] [[animal|beast]].\n\n{{cln|en|2-syllable words|sort=dog}}\n\n----\n\n==French==\n===Noun===\n# [[chien#French|chien]]\n";

    #[test]
    fn unmodified_document_round_trips() {
        let odd = "{{a|[[b|c]]|d=e}} [[x|{{y|z}}]] {{{1|}}} ]] }} [[unclosed <!-- [[hidden]] -->";
        for text in [ENTRY, odd, "", "plain"] {
            assert_eq!(Document::parse(text).to_text(), text);
        }
    }

    #[test]
    fn tricky_inputs_round_trip() {
        let cases = [
            "",
            "\n",
            "{{",
            "[[",
            "}}]]",
            "{{cln|en|[[unclosed",
            "[[Foo|{{bar}}",
            "{{a|{{b|{{c|d}}}}|e=[[f|g]]}}",
            "{{{{{1}}}}}",
            "<!-- {{hidden|x}} --> [[shown]]",
            "<!-- unterminated [[x]]",
            "==English== <!-- lang -->\n# text\n",
            "=== <!-- only a comment --> ===\n",
            "{{x||=|==|a=b=c}}",
            "[[|]] [[a||b]] [[#frag|x]]",
            "<nowiki>{{not a template}}</nowiki> <NOWIKI>[[x",
            "\u{e9}t\u{e9} [[caf\u{e9}|{{l|fr|\u{e9}}}]]",
        ];
        for text in cases {
            let doc = Document::parse(text);
            doc.wikilinks();
            doc.templates();
            doc.sections(2);
            assert_eq!(doc.to_text(), text);
        }
    }

    fn token() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            Just("{{"),
            Just("}}"),
            Just("{{{"),
            Just("}}}"),
            Just("[["),
            Just("]]"),
            Just("|"),
            Just("="),
            Just("=="),
            Just("<!--"),
            Just("-->"),
            Just("<nowiki>"),
            Just("</nowiki>"),
            Just("\n"),
            Just(" "),
            Just("#"),
            Just(":"),
            Just("a"),
            Just("Foo"),
            Just("\u{e9}"),
        ]
    }

    proptest! {
        #[test]
        fn any_token_soup_round_trips(tokens in proptest::collection::vec(token(), 0..40)) {
            let text: String = tokens.concat();
            let doc = Document::parse(text.as_str());
            for link in doc.wikilinks() {
                prop_assert!(text.get(link.span.clone()).is_some());
                prop_assert!(text.get(link.title_span.clone()).is_some());
            }
            for template in doc.templates() {
                prop_assert!(text.get(template.span.clone()).is_some());
                for argument in &template.arguments {
                    prop_assert!(text.get(argument.value_span.clone()).is_some());
                }
            }
            for section in doc.sections(2) {
                prop_assert!(text.get(section.contents_span.clone()).is_some());
            }
            prop_assert_eq!(doc.to_text(), text);
        }
    }

    #[test]
    fn heading_with_trailing_comment_starts_a_section() {
        let doc = Document::parse("==English==\n# dog\n==French== <!-- fr -->\n# chien\n");
        let sections = doc.sections(2);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].title, "French");
        assert_eq!(
            &doc.as_str()[sections[0].contents_span.clone()],
            "# dog\n"
        );
    }

    #[test]
    fn wikilinks_expose_title_and_display_text() {
        let doc = Document::parse(ENTRY);
        let links = doc.wikilinks();
        assert_eq!(links.len(), 3);
        assert_eq!(links[0].title, "canine");
        assert_eq!(links[0].text, None);
        assert_eq!(links[1].title, "animal");
        assert_eq!(links[1].text.as_deref(), Some("beast"));
        assert_eq!(links[2].title, "chien");
        assert_eq!(&ENTRY[links[2].title_span.clone()], "chien");
        assert_eq!(links[2].text.as_deref(), Some("chien"));
    }

    #[test]
    fn nested_links_are_found_inside_templates() {
        let doc = Document::parse("{{l|en|[[Wiktionary:About English|guide]]}}");
        let links = doc.wikilinks();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].title, "Wiktionary:About English");

        let templates = doc.templates();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].arguments.len(), 2);
        assert_eq!(templates[0].arguments[1].value, "[[Wiktionary:About English|guide]]");
    }

    #[test]
    fn templates_split_positional_and_named_arguments() {
        let doc = Document::parse(ENTRY);
        let templates = doc.templates();
        assert_eq!(templates.len(), 2);
        let cln = &templates[1];
        assert_eq!(cln.normal_name(), "cln");
        assert_eq!(cln.arguments.len(), 3);
        assert_eq!(cln.get_arg("1").map(|arg| arg.value.as_str()), Some("en"));
        assert_eq!(
            cln.get_arg("2").map(|arg| arg.value.as_str()),
            Some("2-syllable words")
        );
        assert_eq!(cln.get_arg("sort").map(|arg| arg.value.as_str()), Some("dog"));
        assert!(!cln.has_arg("3"));
        assert_eq!(cln.first_named_arg().map(|arg| arg.name.as_str()), Some("sort"));
    }

    #[test]
    fn equals_inside_nested_link_does_not_name_an_argument() {
        let doc = Document::parse("{{q|[[a=b]]|k = v}}");
        let template = &doc.templates()[0];
        assert!(template.arguments[0].positional);
        assert_eq!(template.arguments[1].name, "k");
        assert_eq!(template.arguments[1].value, " v");
    }

    #[test]
    fn parameters_are_not_templates() {
        let doc = Document::parse("{{{1|{{cln|en|x}}}}}");
        let templates = doc.templates();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].normal_name(), "cln");
    }

    #[test]
    fn sections_cover_subsections() {
        let doc = Document::parse(ENTRY);
        let sections = doc.sections(2);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "English");
        let english = &ENTRY[sections[0].contents_span.clone()];
        assert!(english.starts_with("===Noun==="));
        assert!(english.ends_with("----\n\n"));
        assert_eq!(sections[1].title, "French");
        assert_eq!(doc.sections(3).len(), 2);
    }

    #[test]
    fn splice_replaces_ranges() {
        let mut doc = Document::parse("see [[Foo]] now");
        let link = doc.wikilinks().remove(0);
        doc.splice(link.title_span, "Bar");
        assert_eq!(doc.as_str(), "see [[Bar]] now");
    }

    #[test]
    fn template_names_are_normalized() {
        assert_eq!(
            normalize_template_name(" Template:cat_lang<!-- x -->name "),
            "cat langname"
        );
        assert_eq!(normalize_template_name("C"), "C");
    }

    #[test]
    fn extra_newlines_collapse_to_one_blank_line() {
        assert_eq!(remove_extra_newlines("a\n\n\n\nb\n\nc\n"), "a\n\nb\n\nc\n");
    }
}
