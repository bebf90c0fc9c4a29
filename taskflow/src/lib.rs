//! Outline task tracker library.
//! A markdown outline (headings plus checkbox lists) is loaded into a line buffer,
//! scanned into topics and checkbox groups, projected into a task tree, and completed
//! work is folded into an archive outline without duplicating what is already there.

pub mod core {
    use serde::{Deserialize, Serialize};
    use std::{fmt, ops::RangeInclusive};

    /* ------------------------------ Status ------------------------------ */

    /// Checkbox marker state. `Extracted` only lives between rewrites of a
    /// checkbox whose content moved into its own topic.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum Status {
        Open,       // [ ]
        InProgress, // [-]
        Urgent,     // [!]
        Done,       // [x]
        Extracted,  // [^]
    }

    impl Status {
        pub fn marker(self) -> char {
            match self {
                Status::Open => ' ',
                Status::InProgress => '-',
                Status::Urgent => '!',
                Status::Done => 'x',
                Status::Extracted => '^',
            }
        }

        pub fn from_marker(c: char) -> Option<Self> {
            match c {
                ' ' => Some(Status::Open),
                '-' => Some(Status::InProgress),
                '!' => Some(Status::Urgent),
                'x' => Some(Status::Done),
                '^' => Some(Status::Extracted),
                _ => None,
            }
        }
    }

    impl fmt::Display for Status {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "[{}]", self.marker())
        }
    }

    /* ------------------------------ Ranges ------------------------------ */

    /// Inclusive range of line indices.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    pub struct LineRange {
        pub start: usize,
        pub end: usize,
    }

    impl LineRange {
        pub fn new(start: usize, end: usize) -> Self {
            Self { start, end }
        }

        pub fn single(index: usize) -> Self {
            Self::new(index, index)
        }

        /// Range covering every line, `None` for an empty document.
        pub fn of(lines: &[String]) -> Option<Self> {
            if lines.is_empty() {
                None
            } else {
                Some(Self::new(0, lines.len() - 1))
            }
        }

        pub fn len(&self) -> usize {
            self.end.saturating_sub(self.start) + 1
        }

        pub fn contains(&self, other: &LineRange) -> bool {
            self.start <= other.start && other.end <= self.end
        }

        pub fn contains_line(&self, index: usize) -> bool {
            self.start <= index && index <= self.end
        }

        pub fn lines(&self) -> RangeInclusive<usize> {
            self.start..=self.end
        }
    }

    /* ------------------------------ Sections ------------------------------ */

    /// A heading and everything up to the next heading (at any level) or EOF.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Topic {
        pub range: LineRange,
        /// Count of leading `#`.
        pub level: usize,
    }

    /// A maximal contiguous run of checkbox lines at one indentation depth.
    /// Deeper lines inside the run belong to nested groups.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CheckGroup {
        pub range: LineRange,
        /// Length of the shallowest padding found in the run.
        pub padding: usize,
    }

    /* ------------------------------ Address ------------------------------ */

    pub const ADDRESS_SEPARATOR: &str = "->";

    /// Virtual path written as `A -> B -> C` in a title.
    #[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Address(pub Vec<String>);

    impl Address {
        /// Split on `->`, trimming segments and dropping empty ones.
        pub fn parse(title: &str) -> Self {
            Self(
                title
                    .split(ADDRESS_SEPARATOR)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            )
        }

        pub fn segments(&self) -> &[String] {
            &self.0
        }

        pub fn len(&self) -> usize {
            self.0.len()
        }

        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }

        /// More than one segment: the owner belongs under a non-literal parent.
        pub fn is_virtual(&self) -> bool {
            self.0.len() > 1
        }

        pub fn leaf(&self) -> Option<&str> {
            self.0.last().map(String::as_str)
        }

        pub fn parent_path(&self) -> &[String] {
            match self.0.split_last() {
                Some((_, parents)) => parents,
                None => &[],
            }
        }
    }

    impl fmt::Display for Address {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let sep = format!(" {ADDRESS_SEPARATOR} ");
            f.write_str(&self.0.join(&sep))
        }
    }

    impl<S: Into<String>> FromIterator<S> for Address {
        fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
            Self(iter.into_iter().map(Into::into).collect())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn status_markers_round_trip() {
            for c in [' ', '-', '!', 'x', '^'] {
                let status = Status::from_marker(c).expect("known marker");
                assert_eq!(status.marker(), c);
            }
            assert_eq!(Status::from_marker('X'), None);
            assert_eq!(Status::Done.to_string(), "[x]");
        }

        #[test]
        fn address_splits_and_trims() {
            let address = Address::parse("Proj ->  Sub->Step ");
            assert_eq!(address.segments(), ["Proj", "Sub", "Step"]);
            assert!(address.is_virtual());
            assert_eq!(address.leaf(), Some("Step"));
            assert_eq!(address.parent_path(), ["Proj", "Sub"]);
            assert_eq!(address.to_string(), "Proj -> Sub -> Step");
        }

        #[test]
        fn address_drops_empty_segments() {
            let address = Address::parse("-> lonely");
            assert_eq!(address.segments(), ["lonely"]);
            assert!(!address.is_virtual());
            assert!(Address::parse("").is_empty());
        }

        #[test]
        fn ranges_nest() {
            let outer = LineRange::new(2, 9);
            assert!(outer.contains(&LineRange::new(3, 9)));
            assert!(outer.contains(&outer));
            assert!(!outer.contains(&LineRange::new(1, 4)));
            assert_eq!(outer.len(), 8);
            assert!(LineRange::of(&[]).is_none());
        }
    }
}

pub mod grammar {
    //! Line grammar of the outline dialect, built on `nom`.
    //!
    //! - checkbox: `<padding>- [<status>]<title>`, padding is whitespace
    //! - heading: one or more `#`, then the title (optionally itself a checkbox)
    //! - fence: a trimmed line starting with three backticks
    //! - link: `[title](target)` or `![title](target)`
    //!
    //! Nothing here fails loudly; a line that does not match is simply not that thing.

    use crate::core::Status;
    use nom::{
        IResult,
        bytes::complete::{tag, take_till, take_while},
        character::complete::{anychar, char},
        combinator::{map_opt, opt, rest},
        sequence::delimited,
    };

    type PResult<'a, T> = IResult<&'a str, T>;

    pub const CHECKBOX_OPEN: &str = "- [";
    pub const EMPTY_CHECKBOX: &str = "- [ ]";
    pub const FENCE: &str = "```";

    /// Offset of the marker character from the start of the padding.
    const MARKER_OFFSET: usize = 3;
    /// Length of `- [?]`.
    const CHECKBOX_LEN: usize = 5;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Checkbox<'a> {
        pub padding: &'a str,
        pub status: Status,
        pub title: &'a str,
    }

    fn parse_checkbox(i: &str) -> PResult<'_, Checkbox<'_>> {
        let (i, padding) = take_while(|c: char| c == ' ' || c == '\t')(i)?;
        let (i, _) = tag(CHECKBOX_OPEN)(i)?;
        let (i, status) = map_opt(anychar, Status::from_marker)(i)?;
        let (i, _) = char(']')(i)?;
        let (i, title) = rest(i)?;
        Ok((
            i,
            Checkbox {
                padding,
                status,
                title: title.trim(),
            },
        ))
    }

    pub fn checkbox(line: &str) -> Option<Checkbox<'_>> {
        parse_checkbox(line).ok().map(|(_, cb)| cb)
    }

    pub fn is_checkbox(line: &str) -> bool {
        checkbox(line).is_some()
    }

    pub fn status(line: &str) -> Option<Status> {
        checkbox(line).map(|cb| cb.status)
    }

    /// Literal prefix before the first `- [`; empty when there is none.
    pub fn padding(line: &str) -> &str {
        line.find(CHECKBOX_OPEN).map(|at| &line[..at]).unwrap_or("")
    }

    /// Byte index of the status marker of a checkbox line.
    pub fn status_index(line: &str) -> Option<usize> {
        checkbox(line).map(|cb| cb.padding.len() + MARKER_OFFSET)
    }

    /// Same line with a different marker; `None` when it is not a checkbox.
    pub fn set_status(line: &str, status: Status) -> Option<String> {
        let at = status_index(line)?;
        let mut out = String::with_capacity(line.len());
        out.push_str(&line[..at]);
        out.push(status.marker());
        out.push_str(&line[at + 1..]);
        Some(out)
    }

    /// Checkbox turned into a plain bullet: `<padding>-<rest after ]>`.
    pub fn demote_checkbox(line: &str) -> Option<String> {
        let cb = checkbox(line)?;
        let rest = &line[cb.padding.len() + CHECKBOX_LEN..];
        Some(format!("{}-{}", cb.padding, rest))
    }

    pub fn is_heading(line: &str) -> bool {
        line.starts_with('#')
    }

    pub fn heading_level(line: &str) -> usize {
        line.bytes().take_while(|b| *b == b'#').count()
    }

    pub fn heading(level: usize, title: &str) -> String {
        format!("{} {}", "#".repeat(level), title)
    }

    /// A heading read as a checkbox: `# [x] title` has status `Done`.
    pub fn topic_status(line: &str) -> Option<Status> {
        let stripped = line.trim_start().trim_start_matches('#');
        status(&format!("-{stripped}"))
    }

    /// Display title of a heading, checkbox, or plain line.
    pub fn line_title(line: &str) -> String {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            let rest = trimmed.trim_start_matches('#');
            let as_checkbox = format!("-{rest}");
            return match checkbox(&as_checkbox) {
                Some(cb) => cb.title.to_string(),
                None => rest.trim().to_string(),
            };
        }
        match checkbox(line) {
            Some(cb) => cb.title.to_string(),
            None => line.trim().to_string(),
        }
    }

    pub fn is_fence(line: &str) -> bool {
        line.trim_start().starts_with(FENCE)
    }

    pub fn is_blank(line: &str) -> bool {
        line.trim().is_empty()
    }

    /// Count of leading spaces and tabs.
    pub fn indent_width(line: &str) -> usize {
        line.bytes().take_while(|b| *b == b' ' || *b == b'\t').count()
    }

    /// Drop up to `width` leading whitespace bytes.
    pub fn strip_indent(line: &str, width: usize) -> &str {
        let cut = indent_width(line).min(width);
        &line[cut..]
    }

    /* ------------------------------ Links ------------------------------ */

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Link<'a> {
        /// Byte offsets of the whole link (including a leading `!`).
        pub start: usize,
        pub end: usize,
        pub image: bool,
        pub title: &'a str,
        pub target: &'a str,
    }

    impl Link<'_> {
        pub fn with_target(&self, target: &str) -> String {
            let bang = if self.image { "!" } else { "" };
            format!("{bang}[{}]({target})", self.title)
        }

        /// Title wrapped in backticks: a shell request.
        pub fn is_command(&self) -> bool {
            !self.image
                && self.title.len() >= 2
                && self.title.starts_with('`')
                && self.title.ends_with('`')
        }
    }

    fn parse_link(i: &str) -> PResult<'_, (bool, &str, &str)> {
        let (i, bang) = opt(char('!'))(i)?;
        let (i, title) = delimited(char('['), take_till(|c: char| c == ']'), char(']'))(i)?;
        let (i, target) = delimited(char('('), take_till(|c: char| c == ')'), char(')'))(i)?;
        Ok((i, (bang.is_some(), title, target)))
    }

    pub fn find_links(line: &str) -> Vec<Link<'_>> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos < line.len() {
            let Some(offset) = line[pos..].find(|c: char| c == '[' || c == '!') else {
                break;
            };
            let at = pos + offset;
            match parse_link(&line[at..]) {
                Ok((after, (image, title, target))) => {
                    let end = line.len() - after.len();
                    out.push(Link {
                        start: at,
                        end,
                        image,
                        title,
                        target,
                    });
                    pos = end;
                }
                Err(_) => pos = at + 1,
            }
        }
        out
    }

    pub fn replace_link_target(line: &str, link: &Link<'_>, target: &str) -> String {
        format!(
            "{}{}{}",
            &line[..link.start],
            link.with_target(target),
            &line[link.end..]
        )
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn checkbox_lines() {
            let cb = checkbox("    - [x] ship it ").expect("checkbox");
            assert_eq!(cb.padding, "    ");
            assert_eq!(cb.status, Status::Done);
            assert_eq!(cb.title, "ship it");

            let bare = checkbox("- [ ]").expect("bare checkbox");
            assert_eq!(bare.title, "");
            assert_eq!(bare.status, Status::Open);

            assert!(checkbox("- [?] unknown marker").is_none());
            assert!(checkbox("- plain bullet").is_none());
            assert!(checkbox("see - [x] inline").is_none());
            assert!(checkbox("- [x").is_none());
        }

        #[test]
        fn padding_is_literal_prefix() {
            assert_eq!(padding("  - [ ] a"), "  ");
            assert_eq!(padding("no marker here"), "");
            assert_eq!(padding(""), "");
        }

        #[test]
        fn status_rewrites_only_the_marker() {
            assert_eq!(status_index("  - [ ] a"), Some(5));
            assert_eq!(
                set_status("  - [ ] a", Status::Done).as_deref(),
                Some("  - [x] a")
            );
            assert_eq!(set_status("# heading", Status::Done), None);
            assert_eq!(demote_checkbox("  - [x] done").as_deref(), Some("  - done"));
        }

        #[test]
        fn headings_and_titles() {
            assert_eq!(heading_level("### deep"), 3);
            assert_eq!(heading(2, "Done"), "## Done");
            assert_eq!(topic_status("# [x] shipped"), Some(Status::Done));
            assert_eq!(topic_status("## [-] going"), Some(Status::InProgress));
            assert_eq!(topic_status("# plain"), None);
            assert_eq!(line_title("# [ ] root"), "root");
            assert_eq!(line_title("## Plain heading "), "Plain heading");
            assert_eq!(line_title("  - [!] call bob"), "call bob");
            assert_eq!(line_title("  just text "), "just text");
        }

        #[test]
        fn fences_and_indent() {
            assert!(is_fence("```sh"));
            assert!(is_fence("   ```"));
            assert!(!is_fence("``"));
            assert_eq!(indent_width("\t  x"), 3);
            assert_eq!(strip_indent("    note", 2), "  note");
            assert_eq!(strip_indent(" x", 4), "x");
        }

        #[test]
        fn links_are_found_with_offsets() {
            let line = "- [ ] run [`make`](./files/cmd.log) and ![shot](a.png)";
            let links = find_links(line);
            assert_eq!(links.len(), 2);
            assert_eq!(links[0].title, "`make`");
            assert_eq!(links[0].target, "./files/cmd.log");
            assert!(links[0].is_command());
            assert!(links[1].image);
            assert_eq!(&line[links[1].start..links[1].end], "![shot](a.png)");

            let rewritten = replace_link_target(line, &links[0], "./files/cmd.0.log");
            assert_eq!(
                rewritten,
                "- [ ] run [`make`](./files/cmd.0.log) and ![shot](a.png)"
            );
        }
    }
}

pub mod buffer {
    //! The document as an ordered list of lines with a dirty flag.
    //!
    //! A missing file loads as an empty buffer: the document may not exist yet.
    //! Saving writes every line followed by `\n` and creates parent directories.

    use crate::core::{CheckGroup, LineRange, Topic};
    use crate::{groups, scanner};
    use std::{
        fs, io,
        path::{Path, PathBuf},
    };
    use tracing::debug;

    #[derive(Debug, thiserror::Error)]
    pub enum BufferError {
        #[error("reading {path:?}")]
        Read {
            path: PathBuf,
            #[source]
            source: io::Error,
        },
        #[error("writing {path:?}")]
        Write {
            path: PathBuf,
            #[source]
            source: io::Error,
        },
        #[error("buffer has no backing file")]
        NoPath,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct LineBuffer {
        path: Option<PathBuf>,
        lines: Vec<String>,
        changed: bool,
    }

    impl LineBuffer {
        pub fn load(path: impl Into<PathBuf>) -> Result<Self, BufferError> {
            let path = path.into();
            let lines = match fs::read_to_string(&path) {
                Ok(text) => split_lines(&text),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!(?path, "document absent, starting empty");
                    Vec::new()
                }
                Err(source) => return Err(BufferError::Read { path, source }),
            };
            Ok(Self {
                path: Some(path),
                lines,
                changed: false,
            })
        }

        /// In-memory buffer without a backing file.
        pub fn from_lines<I, S>(lines: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                path: None,
                lines: lines.into_iter().map(Into::into).collect(),
                changed: false,
            }
        }

        pub fn from_text(text: &str) -> Self {
            Self::from_lines(split_lines(text))
        }

        pub fn path(&self) -> Option<&Path> {
            self.path.as_deref()
        }

        pub fn lines(&self) -> &[String] {
            &self.lines
        }

        pub fn line(&self, index: usize) -> Option<&str> {
            self.lines.get(index).map(String::as_str)
        }

        pub fn len(&self) -> usize {
            self.lines.len()
        }

        pub fn is_empty(&self) -> bool {
            self.lines.is_empty()
        }

        pub fn full_range(&self) -> Option<LineRange> {
            LineRange::of(&self.lines)
        }

        pub fn insert(&mut self, index: usize, line: impl Into<String>) {
            let index = index.min(self.lines.len());
            self.lines.insert(index, line.into());
            self.changed = true;
        }

        /// Insert `lines` at `index`, keeping their order.
        pub fn insert_all<I, S>(&mut self, index: usize, lines: I)
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            let index = index.min(self.lines.len());
            let before = self.lines.len();
            self.lines
                .splice(index..index, lines.into_iter().map(Into::into));
            if self.lines.len() != before {
                self.changed = true;
            }
        }

        /// Remove `start..=end`, clamped to the buffer.
        pub fn remove(&mut self, start: usize, end: usize) {
            if start >= self.lines.len() || end < start {
                return;
            }
            let end = end.min(self.lines.len() - 1);
            self.lines.drain(start..=end);
            self.changed = true;
        }

        pub fn remove_line(&mut self, index: usize) {
            self.remove(index, index);
        }

        pub fn update(&mut self, index: usize, line: impl Into<String>) {
            if let Some(slot) = self.lines.get_mut(index) {
                *slot = line.into();
                self.changed = true;
            }
        }

        pub fn append(&mut self, line: impl Into<String>) {
            self.lines.push(line.into());
            self.changed = true;
        }

        pub fn extend<I, S>(&mut self, lines: I)
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            let len = self.lines.len();
            self.insert_all(len, lines);
        }

        pub fn trim_trailing_empty(&mut self) {
            if trim_trailing_blank(&mut self.lines) {
                self.changed = true;
            }
        }

        pub fn has_changed(&self) -> bool {
            self.changed
        }

        pub fn to_text(&self) -> String {
            let mut out = String::new();
            for line in &self.lines {
                out.push_str(line);
                out.push('\n');
            }
            out
        }

        /// Write to the backing file; a no-op when nothing changed.
        pub fn save(&mut self) -> Result<(), BufferError> {
            if !self.changed {
                return Ok(());
            }
            let path = self.path.as_ref().ok_or(BufferError::NoPath)?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| BufferError::Write {
                    path: path.clone(),
                    source,
                })?;
            }
            fs::write(path, self.to_text()).map_err(|source| BufferError::Write {
                path: path.clone(),
                source,
            })?;
            debug!(?path, lines = self.lines.len(), "document saved");
            self.changed = false;
            Ok(())
        }

        pub fn topics(&self) -> Vec<Topic> {
            scanner::topics(&self.lines)
        }

        pub fn check_groups(&self, range: LineRange) -> Vec<CheckGroup> {
            groups::extract_check_groups(&self.lines, range)
        }
    }

    fn split_lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    /// Pop trailing whitespace-only lines; true when something was removed.
    pub fn trim_trailing_blank(lines: &mut Vec<String>) -> bool {
        let before = lines.len();
        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }
        lines.len() != before
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn missing_file_loads_empty() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let buffer = LineBuffer::load(tmp.path().join("absent.md")).expect("load");
            assert!(buffer.is_empty());
            assert!(!buffer.has_changed());
        }

        #[test]
        fn mutations_mark_dirty_and_keep_order() {
            let mut buffer = LineBuffer::from_lines(["a", "d"]);
            assert!(!buffer.has_changed());
            buffer.insert_all(1, ["b", "c"]);
            assert_eq!(buffer.lines(), ["a", "b", "c", "d"]);
            assert!(buffer.has_changed());

            buffer.remove(1, 2);
            assert_eq!(buffer.lines(), ["a", "d"]);
            buffer.update(1, "z");
            buffer.append("");
            buffer.append("  ");
            buffer.trim_trailing_empty();
            assert_eq!(buffer.lines(), ["a", "z"]);
            buffer.remove_line(0);
            assert_eq!(buffer.lines(), ["z"]);
        }

        #[test]
        fn empty_insert_is_not_a_change() {
            let mut buffer = LineBuffer::from_lines(["a"]);
            buffer.insert_all(0, Vec::<String>::new());
            buffer.trim_trailing_empty();
            buffer.remove(5, 9);
            assert!(!buffer.has_changed());
        }

        #[test]
        fn save_writes_newline_terminated_text_once() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("nested/dir/tasks.md");
            let mut buffer = LineBuffer::load(&path).expect("load");
            buffer.save().expect("unchanged save is a no-op");
            assert!(!path.exists());

            buffer.extend(["# [ ] root", "- [ ] a"]);
            buffer.save().expect("save");
            assert_eq!(
                fs::read_to_string(&path).expect("read back"),
                "# [ ] root\n- [ ] a\n"
            );
            assert!(!buffer.has_changed());

            let reloaded = LineBuffer::load(&path).expect("reload");
            assert_eq!(reloaded.lines(), buffer.lines());
        }

        #[test]
        fn in_memory_buffer_cannot_save_changes() {
            let mut buffer = LineBuffer::from_text("a\n");
            buffer.append("b");
            assert!(matches!(buffer.save(), Err(BufferError::NoPath)));
        }
    }
}

pub mod scanner {
    //! Fence-aware partition of lines into topics.

    use crate::core::{LineRange, Topic};
    use crate::grammar::{heading_level, is_fence, is_heading, line_title};

    /// Topics inside `range`, ascending by start. Lines before the first
    /// heading are left to the caller.
    pub fn scan_topics(lines: &[String], range: LineRange) -> Vec<Topic> {
        let mut topics = Vec::new();
        if lines.is_empty() || range.start >= lines.len() {
            return topics;
        }
        let end = range.end.min(lines.len() - 1);
        let mut open: Option<(usize, usize)> = None;
        let mut in_fence = false;
        for (i, line) in lines.iter().enumerate().take(end + 1).skip(range.start) {
            if is_fence(line) {
                in_fence = !in_fence;
                continue;
            }
            if in_fence || !is_heading(line) {
                continue;
            }
            if let Some((start, level)) = open.take() {
                topics.push(Topic {
                    range: LineRange::new(start, i - 1),
                    level,
                });
            }
            open = Some((i, heading_level(line)));
        }
        if let Some((start, level)) = open {
            topics.push(Topic {
                range: LineRange::new(start, end),
                level,
            });
        }
        topics
    }

    pub fn topics(lines: &[String]) -> Vec<Topic> {
        LineRange::of(lines)
            .map(|range| scan_topics(lines, range))
            .unwrap_or_default()
    }

    /// Lines before the first topic, if any.
    pub fn preamble(lines: &[String], topics: &[Topic]) -> Option<LineRange> {
        match topics.first() {
            Some(first) if first.range.start > 0 => Some(LineRange::new(0, first.range.start - 1)),
            Some(_) => None,
            None => LineRange::of(lines),
        }
    }

    /// Number of lines from `start` until the next heading outside a fence.
    pub fn content_height(lines: &[String], start: usize) -> usize {
        let mut in_fence = false;
        let mut height = 0;
        for line in lines.iter().skip(start) {
            if is_fence(line) {
                in_fence = !in_fence;
            }
            if !in_fence && is_heading(line) {
                break;
            }
            height += 1;
        }
        height
    }

    /// Per-line flag for `range`: true when the line is a fence marker or inside one.
    pub fn fence_mask(lines: &[String], range: LineRange) -> Vec<bool> {
        let mut in_fence = false;
        range
            .lines()
            .map(|i| match lines.get(i) {
                Some(line) if is_fence(line) => {
                    in_fence = !in_fence;
                    true
                }
                Some(_) => in_fence,
                None => false,
            })
            .collect()
    }

    pub fn topic_by_title<'a>(lines: &[String], topics: &'a [Topic], title: &str) -> Option<&'a Topic> {
        topics
            .iter()
            .find(|t| line_title(&lines[t.range.start]) == title)
    }

    /// Topic range extended over the deeper-level topics that follow it.
    pub fn section(topics: &[Topic], index: usize) -> LineRange {
        let root = topics[index];
        let end = topics[index + 1..]
            .iter()
            .take_while(|t| t.level > root.level)
            .last()
            .map(|t| t.range.end)
            .unwrap_or(root.range.end);
        LineRange::new(root.range.start, end)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn lines(src: &[&str]) -> Vec<String> {
            src.iter().map(|s| s.to_string()).collect()
        }

        #[test]
        fn topics_cover_until_next_heading() {
            let doc = lines(&["intro", "# A", "text", "## B", "- [ ] b", "# C"]);
            let topics = topics(&doc);
            assert_eq!(
                topics,
                vec![
                    Topic { range: LineRange::new(1, 2), level: 1 },
                    Topic { range: LineRange::new(3, 4), level: 2 },
                    Topic { range: LineRange::new(5, 5), level: 1 },
                ]
            );
            assert_eq!(preamble(&doc, &topics), Some(LineRange::new(0, 0)));
        }

        #[test]
        fn headings_inside_fences_are_inert() {
            let doc = lines(&["# A", "```sh", "# not a topic", "```", "after", "# B"]);
            let topics = topics(&doc);
            assert_eq!(topics.len(), 2);
            assert_eq!(topics[0].range, LineRange::new(0, 4));
            assert_eq!(content_height(&doc, 1), 4);
        }

        #[test]
        fn section_spans_deeper_topics() {
            let doc = lines(&["# A", "## A1", "### A2", "## A3", "# B"]);
            let topics = topics(&doc);
            assert_eq!(section(&topics, 0), LineRange::new(0, 3));
            assert_eq!(section(&topics, 1), LineRange::new(1, 2));
            assert_eq!(section(&topics, 4), LineRange::new(4, 4));
            assert_eq!(
                topic_by_title(&doc, &topics, "A3").map(|t| t.range.start),
                Some(3)
            );
        }

        #[test]
        fn fence_mask_flags_fenced_lines() {
            let doc = lines(&["a", "```", "b", "```", "c"]);
            let mask = fence_mask(&doc, LineRange::new(0, 4));
            assert_eq!(mask, vec![false, true, true, true, false]);
        }

        #[test]
        fn empty_document_has_no_topics() {
            assert!(topics(&[]).is_empty());
            assert_eq!(preamble(&[], &[]), None);
        }
    }
}

pub mod groups {
    //! Checkbox group extraction.
    //!
    //! Every checkbox line is recorded with its padding width. Levels are then
    //! consumed shallowest first: at each level the lines at that depth or deeper
    //! are coalesced into runs of consecutive indices. Shallow levels give the
    //! outer groups, deeper levels the nested ones, at any nesting depth.

    use crate::core::{CheckGroup, LineRange};
    use crate::grammar::{checkbox, is_fence};
    use std::collections::BTreeSet;

    pub fn extract_check_groups(lines: &[String], range: LineRange) -> Vec<CheckGroup> {
        let mut groups: Vec<CheckGroup> = Vec::new();
        if lines.is_empty() || range.start >= lines.len() {
            return groups;
        }
        let end = range.end.min(lines.len() - 1);

        let mut marks: Vec<(usize, usize)> = Vec::new();
        let mut in_fence = false;
        for (index, line) in lines.iter().enumerate().take(end + 1).skip(range.start) {
            if is_fence(line) {
                in_fence = !in_fence;
                continue;
            }
            if in_fence {
                continue;
            }
            if let Some(cb) = checkbox(line) {
                marks.push((index, cb.padding.len()));
            }
        }

        let mut pending: BTreeSet<usize> = marks.iter().map(|&(_, level)| level).collect();
        while let Some(level) = pending.pop_first() {
            let mut current: Option<CheckGroup> = None;
            for &(index, padding) in marks.iter().filter(|(_, p)| *p >= level) {
                let extends = current
                    .as_ref()
                    .is_some_and(|g| g.range.end + 1 == index);
                if extends {
                    if let Some(group) = current.as_mut() {
                        group.range.end = index;
                        group.padding = group.padding.min(padding);
                    }
                } else {
                    if let Some(done) = current.take() {
                        push_distinct(&mut groups, done);
                    }
                    current = Some(CheckGroup {
                        range: LineRange::single(index),
                        padding,
                    });
                }
            }
            if let Some(done) = current {
                push_distinct(&mut groups, done);
            }
        }
        groups
    }

    fn push_distinct(groups: &mut Vec<CheckGroup>, group: CheckGroup) {
        if !groups.iter().any(|g| g.range == group.range) {
            groups.push(group);
        }
    }

    /// Literal padding of the group's outermost lines.
    pub fn group_padding<'a>(lines: &'a [String], group: &CheckGroup) -> &'a str {
        group
            .range
            .lines()
            .filter_map(|i| lines.get(i).and_then(|l| checkbox(l)))
            .find(|cb| cb.padding.len() == group.padding)
            .map(|cb| cb.padding)
            .unwrap_or("")
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn lines(src: &[&str]) -> Vec<String> {
            src.iter().map(|s| s.to_string()).collect()
        }

        fn ranges(groups: &[CheckGroup]) -> Vec<(usize, usize)> {
            groups.iter().map(|g| (g.range.start, g.range.end)).collect()
        }

        #[test]
        fn nested_levels_produce_nested_groups() {
            let doc = lines(&[
                "# T",
                "- [ ] a",
                "  - [ ] a1",
                "    - [ ] a1x",
                "  - [x] a2",
                "- [ ] b",
                "text",
                "- [ ] c",
            ]);
            let groups = extract_check_groups(&doc, LineRange::new(0, 7));
            assert_eq!(ranges(&groups), vec![(1, 5), (7, 7), (2, 4), (3, 3)]);
            assert_eq!(groups[2].padding, 2);
            assert_eq!(group_padding(&doc, &groups[3]), "    ");
        }

        #[test]
        fn sibling_nested_runs_split() {
            let doc = lines(&["- [ ] a", "  - [ ] a1", "- [ ] b", "  - [ ] b1"]);
            let groups = extract_check_groups(&doc, LineRange::new(0, 3));
            assert_eq!(ranges(&groups), vec![(0, 3), (1, 1), (3, 3)]);
        }

        #[test]
        fn duplicates_across_levels_are_dropped() {
            let doc = lines(&["- [ ] a", "note", "  - [ ] b"]);
            let groups = extract_check_groups(&doc, LineRange::new(0, 2));
            assert_eq!(ranges(&groups), vec![(0, 0), (2, 2)]);
            assert_eq!(groups[1].padding, 2);
        }

        #[test]
        fn fenced_checkboxes_are_ignored() {
            let doc = lines(&["```", "- [ ] code", "```", "- [ ]"]);
            let groups = extract_check_groups(&doc, LineRange::new(0, 3));
            assert_eq!(ranges(&groups), vec![(3, 3)]);
        }
    }
}

pub mod nesting {
    //! Containment forest over inclusive line intervals.
    //!
    //! Intervals arrive in any order. Each one is placed under the smallest node
    //! that contains it; nodes it contains are demoted beneath it. Traversals use
    //! an explicit stack.

    use crate::core::LineRange;
    use std::cmp::Reverse;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct NestNode {
        pub range: LineRange,
        pub children: Vec<usize>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct Forest {
        nodes: Vec<NestNode>,
        roots: Vec<usize>,
    }

    impl Forest {
        pub fn assemble<I: IntoIterator<Item = LineRange>>(ranges: I) -> Self {
            let mut forest = Self::default();
            for range in ranges {
                forest.insert(range);
            }
            forest
        }

        /// Place one interval; an exact duplicate of a known interval is ignored.
        pub fn insert(&mut self, range: LineRange) -> Option<usize> {
            if self.nodes.iter().any(|n| n.range == range) {
                return None;
            }
            let id = self.nodes.len();
            let container = self.smallest_container(range);
            self.nodes.push(NestNode {
                range,
                children: Vec::new(),
            });
            match container {
                Some(parent) => {
                    let siblings = std::mem::take(&mut self.nodes[parent].children);
                    let (inner, mut outer) = self.split_contained(siblings, range);
                    self.nodes[id].children = inner;
                    outer.push(id);
                    self.sort_ids(&mut outer);
                    self.nodes[parent].children = outer;
                }
                None => {
                    let roots = std::mem::take(&mut self.roots);
                    let (inner, mut outer) = self.split_contained(roots, range);
                    self.nodes[id].children = inner;
                    outer.push(id);
                    self.sort_ids(&mut outer);
                    self.roots = outer;
                }
            }
            Some(id)
        }

        fn smallest_container(&self, range: LineRange) -> Option<usize> {
            let mut best: Option<usize> = None;
            let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
            while let Some(id) = stack.pop() {
                let node = &self.nodes[id];
                if !node.range.contains(&range) {
                    continue;
                }
                if best.is_none_or(|b| node.range.len() < self.nodes[b].range.len()) {
                    best = Some(id);
                }
                stack.extend(node.children.iter().rev().copied());
            }
            best
        }

        fn split_contained(&self, ids: Vec<usize>, range: LineRange) -> (Vec<usize>, Vec<usize>) {
            let (mut inner, outer): (Vec<usize>, Vec<usize>) = ids
                .into_iter()
                .partition(|&c| range.contains(&self.nodes[c].range));
            self.sort_ids(&mut inner);
            (inner, outer)
        }

        fn sort_ids(&self, ids: &mut [usize]) {
            ids.sort_by_key(|&id| {
                let r = self.nodes[id].range;
                (r.start, Reverse(r.end))
            });
        }

        pub fn roots(&self) -> &[usize] {
            &self.roots
        }

        pub fn node(&self, id: usize) -> &NestNode {
            &self.nodes[id]
        }

        pub fn children(&self, id: usize) -> &[usize] {
            &self.nodes[id].children
        }

        pub fn len(&self) -> usize {
            self.nodes.len()
        }

        pub fn is_empty(&self) -> bool {
            self.nodes.is_empty()
        }

        /// Node ids in preorder, roots in start order.
        pub fn preorder(&self) -> Vec<usize> {
            let mut out = Vec::with_capacity(self.nodes.len());
            let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
            while let Some(id) = stack.pop() {
                out.push(id);
                stack.extend(self.nodes[id].children.iter().rev().copied());
            }
            out
        }
    }

}

pub mod tree {
    //! Task tree projected from topics and nested checkbox groups.
    //!
    //! Every topic yields one root task. Checkbox groups inside the topic become
    //! layers of sibling tasks; a nested group hangs under the sibling on the line
    //! right above it. Roots whose title is an `A -> B -> C` address are then moved
    //! under the matching (or synthesized) parents.

    use crate::core::{Address, CheckGroup, LineRange, Status, Topic};
    use crate::grammar::{checkbox, line_title, topic_status};
    use crate::groups::extract_check_groups;
    use crate::nesting::Forest;
    use crate::scanner;
    use serde::Serialize;
    use tracing::debug;

    /* ------------------------------- IDs ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
    #[serde(transparent)]
    pub struct TaskId(pub usize);

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "snake_case")]
    pub enum TaskKind {
        Topic,
        Checkbox,
        /// Parent synthesized for an address segment with no matching task.
        Placeholder,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Task {
        pub title: String,
        /// Effective status: a task whose children are all done is done.
        pub status: Status,
        /// Status as written on the line.
        pub marker: Status,
        pub kind: TaskKind,
        pub line_index: Option<usize>,
        /// Lines owned by the task, its nested checkboxes included.
        pub span: Option<LineRange>,
        /// Pending virtual placement, consumed by address resolution.
        pub address: Option<Address>,
        pub children: Vec<TaskId>,
    }

    impl Task {
        fn placeholder(title: &str) -> Self {
            Self {
                title: title.to_string(),
                status: Status::Open,
                marker: Status::Open,
                kind: TaskKind::Placeholder,
                line_index: None,
                span: None,
                address: None,
                children: Vec::new(),
            }
        }

        pub fn is_leaf(&self) -> bool {
            self.children.is_empty()
        }
    }

    /* ------------------------------- Tree ------------------------------- */

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct TaskTree {
        tasks: Vec<Task>,
        roots: Vec<TaskId>,
        preamble: Option<LineRange>,
    }

    impl TaskTree {
        pub fn build(lines: &[String]) -> Self {
            let topics = scanner::topics(lines);
            let preamble = scanner::preamble(lines, &topics);
            let mut builder = TreeBuilder {
                lines,
                tasks: Vec::new(),
            };

            let mut roots = Vec::new();
            if let Some(range) = preamble {
                roots.extend(builder.group_tasks(range));
            }
            for topic in &topics {
                roots.push(builder.topic_task(topic));
            }
            for &id in &roots {
                builder.seal(id);
                let task = &mut builder.tasks[id.0];
                if task.kind != TaskKind::Topic {
                    continue;
                }
                let address = Address::parse(&task.title);
                if address.is_virtual() {
                    task.address = Some(address);
                }
            }

            let mut tree = TaskTree {
                tasks: builder.tasks,
                roots,
                preamble,
            };
            tree.resolve_addresses();
            debug!(
                tasks = tree.tasks.len(),
                roots = tree.roots.len(),
                "task tree built"
            );
            tree
        }

        pub fn roots(&self) -> &[TaskId] {
            &self.roots
        }

        pub fn task(&self, id: TaskId) -> &Task {
            &self.tasks[id.0]
        }

        pub fn children(&self, id: TaskId) -> &[TaskId] {
            &self.tasks[id.0].children
        }

        pub fn len(&self) -> usize {
            self.tasks.len()
        }

        pub fn is_empty(&self) -> bool {
            self.tasks.is_empty()
        }

        pub fn preorder(&self) -> Vec<TaskId> {
            let mut out = Vec::with_capacity(self.tasks.len());
            let mut stack: Vec<TaskId> = self.roots.iter().rev().copied().collect();
            while let Some(id) = stack.pop() {
                out.push(id);
                stack.extend(self.tasks[id.0].children.iter().rev().copied());
            }
            out
        }

        /// First task titled `title`, in preorder.
        pub fn find(&self, title: &str) -> Option<TaskId> {
            self.preorder()
                .into_iter()
                .find(|id| self.tasks[id.0].title == title)
        }

        /// Write the tree back as lines. Each task emits its span with the tasks
        /// nested in it written in place; tasks placed away from their lines by
        /// an address come out as blocks of their own, in line order.
        pub fn render(&self, lines: &[String]) -> Vec<String> {
            let mut pending: Vec<(LineRange, Vec<TaskId>)> = Vec::new();
            let mut tops = self.backed(&self.roots);
            if let Some(preamble) = self.preamble {
                let (orphans, rest): (Vec<TaskId>, Vec<TaskId>) = tops
                    .into_iter()
                    .partition(|id| self.tasks[id.0].span.is_some_and(|s| preamble.contains(&s)));
                pending.push((preamble, orphans));
                tops = rest;
            }
            for id in tops {
                if let Some(span) = self.tasks[id.0].span {
                    pending.push((span, self.backed(&self.tasks[id.0].children)));
                }
            }

            let mut blocks: Vec<(usize, Vec<String>)> = Vec::new();
            while let Some((span, kids)) = pending.pop() {
                let mut out = Vec::new();
                self.emit(span, kids, lines, &mut out, &mut pending);
                blocks.push((span.start, out));
            }
            blocks.sort_by_key(|(start, _)| *start);
            blocks.into_iter().flat_map(|(_, block)| block).collect()
        }

        /// Tasks among `ids` that own lines, looking through placeholders.
        fn backed(&self, ids: &[TaskId]) -> Vec<TaskId> {
            let mut out = Vec::new();
            let mut stack: Vec<TaskId> = ids.iter().rev().copied().collect();
            while let Some(id) = stack.pop() {
                let task = &self.tasks[id.0];
                if task.span.is_some() {
                    out.push(id);
                } else {
                    stack.extend(task.children.iter().rev().copied());
                }
            }
            out
        }

        fn emit(
            &self,
            span: LineRange,
            kids: Vec<TaskId>,
            lines: &[String],
            out: &mut Vec<String>,
            detached: &mut Vec<(LineRange, Vec<TaskId>)>,
        ) {
            let mut nested: Vec<(LineRange, TaskId)> = Vec::new();
            for id in kids {
                let Some(child) = self.tasks[id.0].span else {
                    continue;
                };
                if span.contains(&child) {
                    nested.push((child, id));
                } else {
                    detached.push((child, self.backed(&self.tasks[id.0].children)));
                }
            }
            nested.sort();

            let mut cursor = span.start;
            for (child, id) in nested {
                if child.start < cursor {
                    continue;
                }
                out.extend_from_slice(slice(lines, cursor, child.start));
                self.emit(child, self.backed(&self.tasks[id.0].children), lines, out, detached);
                cursor = child.end + 1;
            }
            out.extend_from_slice(slice(lines, cursor, span.end + 1));
        }

        /// Tasks with `status` and their ancestors.
        pub fn prune(&self, status: Status) -> TaskTree {
            let mut out = TaskTree {
                preamble: self.preamble,
                ..TaskTree::default()
            };
            for &root in &self.roots {
                if let Some(id) = self.copy_matching(root, status, &mut out.tasks) {
                    out.roots.push(id);
                }
            }
            out
        }

        fn copy_matching(&self, id: TaskId, status: Status, arena: &mut Vec<Task>) -> Option<TaskId> {
            let task = &self.tasks[id.0];
            let children: Vec<TaskId> = task
                .children
                .iter()
                .filter_map(|&c| self.copy_matching(c, status, arena))
                .collect();
            if task.status != status && children.is_empty() {
                return None;
            }
            let mut copy = task.clone();
            copy.children = children;
            arena.push(copy);
            Some(TaskId(arena.len() - 1))
        }

        pub fn view(&self) -> Vec<TaskView> {
            self.roots.iter().map(|&id| self.view_of(id)).collect()
        }

        fn view_of(&self, id: TaskId) -> TaskView {
            let task = &self.tasks[id.0];
            TaskView {
                title: task.title.clone(),
                status: task.status,
                kind: task.kind,
                line: task.line_index.map(|i| i + 1),
                children: task.children.iter().map(|&c| self.view_of(c)).collect(),
            }
        }

        /// Indented plain-text listing, two spaces per depth.
        pub fn outline(&self) -> Vec<String> {
            let mut out = Vec::new();
            let mut stack: Vec<(TaskId, usize)> =
                self.roots.iter().rev().map(|&id| (id, 0)).collect();
            while let Some((id, depth)) = stack.pop() {
                let task = &self.tasks[id.0];
                out.push(format!("{}{} {}", "  ".repeat(depth), task.status, task.title));
                stack.extend(task.children.iter().rev().map(|&c| (c, depth + 1)));
            }
            out
        }

        fn push(&mut self, task: Task) -> TaskId {
            self.tasks.push(task);
            TaskId(self.tasks.len() - 1)
        }

        /// Move every addressed root under its address path, oldest root first.
        fn resolve_addresses(&mut self) {
            while let Some(pos) = self
                .roots
                .iter()
                .position(|id| self.tasks[id.0].address.is_some())
            {
                let id = self.roots.remove(pos);
                let Some(address) = self.tasks[id.0].address.take() else {
                    continue;
                };

                let mut parent: Option<TaskId> = None;
                let mut matched = 0;
                for segment in address.parent_path() {
                    let candidates = match parent {
                        None => &self.roots,
                        Some(p) => &self.tasks[p.0].children,
                    };
                    match candidates
                        .iter()
                        .copied()
                        .find(|c| self.tasks[c.0].title == *segment)
                    {
                        Some(found) => {
                            parent = Some(found);
                            matched += 1;
                        }
                        None => break,
                    }
                }

                for segment in &address.parent_path()[matched..] {
                    let placeholder = self.push(Task::placeholder(segment));
                    match parent {
                        Some(p) => self.tasks[p.0].children.push(placeholder),
                        None => self.roots.insert(pos, placeholder),
                    }
                    parent = Some(placeholder);
                }

                if let Some(leaf) = address.leaf() {
                    self.tasks[id.0].title = leaf.to_string();
                }
                debug!(%address, matched, "placed addressed task");
                match parent {
                    Some(p) => self.tasks[p.0].children.push(id),
                    None => self.roots.insert(pos, id),
                }
            }
        }
    }

    fn slice(lines: &[String], from: usize, to: usize) -> &[String] {
        lines.get(from..to.min(lines.len())).unwrap_or_default()
    }

    /// JSON-friendly nested view of a task.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct TaskView {
        pub title: String,
        pub status: Status,
        pub kind: TaskKind,
        /// 1-based line number.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub line: Option<usize>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub children: Vec<TaskView>,
    }

    /* ------------------------------ Builder ------------------------------ */

    struct TreeBuilder<'a> {
        lines: &'a [String],
        tasks: Vec<Task>,
    }

    impl TreeBuilder<'_> {
        fn push(&mut self, task: Task) -> TaskId {
            self.tasks.push(task);
            TaskId(self.tasks.len() - 1)
        }

        fn topic_task(&mut self, topic: &Topic) -> TaskId {
            let heading = &self.lines[topic.range.start];
            let marker = topic_status(heading).unwrap_or(Status::Open);
            let children = if topic.range.end > topic.range.start {
                self.group_tasks(LineRange::new(topic.range.start + 1, topic.range.end))
            } else {
                Vec::new()
            };
            self.push(Task {
                title: line_title(heading),
                status: marker,
                marker,
                kind: TaskKind::Topic,
                line_index: Some(topic.range.start),
                span: Some(topic.range),
                address: None,
                children,
            })
        }

        /// Top-level checkbox tasks of `range`, nested groups attached.
        fn group_tasks(&mut self, range: LineRange) -> Vec<TaskId> {
            let groups = extract_check_groups(self.lines, range);
            let forest = Forest::assemble(groups.iter().map(|g| g.range));
            let mut out = Vec::new();
            for &node in forest.roots() {
                out.extend(self.layer(&forest, &groups, node));
            }
            out
        }

        fn layer(&mut self, forest: &Forest, groups: &[CheckGroup], node: usize) -> Vec<TaskId> {
            let range = forest.node(node).range;
            let padding = groups
                .iter()
                .find(|g| g.range == range)
                .map(|g| g.padding)
                .unwrap_or(0);

            let mut siblings = Vec::new();
            for i in range.lines() {
                let Some(cb) = self.lines.get(i).and_then(|l| checkbox(l)) else {
                    continue;
                };
                if cb.padding.len() != padding {
                    continue;
                }
                let task = Task {
                    title: cb.title.to_string(),
                    status: cb.status,
                    marker: cb.status,
                    kind: TaskKind::Checkbox,
                    line_index: Some(i),
                    span: Some(LineRange::single(i)),
                    address: None,
                    children: Vec::new(),
                };
                siblings.push(self.push(task));
            }

            // A nested run with no checkbox right above it at this depth joins the layer.
            let mut lifted = Vec::new();
            for &child in forest.children(node) {
                let start = forest.node(child).range.start;
                let parent = siblings
                    .iter()
                    .copied()
                    .find(|id: &TaskId| self.tasks[id.0].line_index.map(|li| li + 1) == Some(start));
                let nested = self.layer(forest, groups, child);
                match parent {
                    Some(parent) => self.tasks[parent.0].children.extend(nested),
                    None => lifted.extend(nested),
                }
            }
            if !lifted.is_empty() {
                siblings.extend(lifted);
                siblings.sort_by_key(|id| self.tasks[id.0].line_index);
            }
            siblings
        }

        /// Bottom-up rollup of statuses and checkbox spans.
        fn seal(&mut self, id: TaskId) {
            let children = self.tasks[id.0].children.clone();
            for &child in &children {
                self.seal(child);
            }
            if children.is_empty() {
                return;
            }
            let all_done = children
                .iter()
                .all(|c| self.tasks[c.0].status == Status::Done);
            let last_line = children
                .iter()
                .filter_map(|c| self.tasks[c.0].span)
                .map(|s| s.end)
                .max();
            let task = &mut self.tasks[id.0];
            if all_done {
                task.status = Status::Done;
            }
            if task.kind == TaskKind::Checkbox {
                if let (Some(span), Some(end)) = (task.span.as_mut(), last_line) {
                    span.end = span.end.max(end);
                }
            }
        }
    }

}

pub mod archive {
    //! Folds a completed block into a hierarchical archive outline.
    //!
    //! The address is matched against existing headings one level at a time
    //! (`# A`, then `## B` inside `A`, ...). Missing levels are created after the
    //! deepest match. Content already stored under the target heading is not
    //! written twice, so merging the same entry again changes nothing.

    use crate::buffer::LineBuffer;
    use crate::core::Address;
    use crate::grammar::{heading, heading_level, is_blank, is_fence, is_heading};
    use crate::scanner::{content_height, topics};
    use serde::Serialize;
    use tracing::debug;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ArchiveEntry {
        pub lines: Vec<String>,
        pub address: Address,
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
    pub struct MergeOutcome {
        pub headings_created: usize,
        pub lines_inserted: usize,
        /// Lines dropped because the archive already holds them.
        pub lines_skipped: usize,
    }

    pub fn merge(archive: &mut LineBuffer, entry: &ArchiveEntry) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let address = &entry.address;

        let found = heading_chain(archive.lines(), address);
        if found.len() < address.len() {
            outcome.headings_created = create_headings(archive, address, &found);
        }

        let chain = heading_chain(archive.lines(), address);
        let (block_start, block_end) = match chain.last() {
            Some(&deepest) => {
                let start = deepest + 1;
                (start, start + content_height(archive.lines(), start))
            }
            None => (0, 0),
        };

        let existing = trimmed(&archive.lines()[block_start..block_end]);
        let incoming = trimmed(&entry.lines);
        let skip = duplicate_prefix(existing, incoming);
        let mut lines: Vec<String> = incoming[skip..].to_vec();
        outcome.lines_skipped = skip;

        if !lines.is_empty() {
            let mut at = block_end;
            while at > block_start && is_blank(&archive.lines()[at - 1]) {
                at -= 1;
            }
            let next_is_content = archive.line(at).is_some_and(|l| !is_blank(l));
            if next_is_content || at >= archive.len() {
                lines.push(String::new());
            }
            outcome.lines_inserted = lines.len();
            archive.insert_all(at, lines);
        }

        archive.trim_trailing_empty();
        debug!(
            %address,
            created = outcome.headings_created,
            inserted = outcome.lines_inserted,
            skipped = outcome.lines_skipped,
            "archive merge"
        );
        outcome
    }

    /// Line indices of `# a0`, `## a1`, ... found in order, each inside the
    /// previous one's section. Stops at the first level that is missing.
    pub fn heading_chain(lines: &[String], address: &Address) -> Vec<usize> {
        let mut positions = Vec::new();
        let mut in_fence = false;
        for (i, line) in lines.iter().enumerate() {
            if is_fence(line) {
                in_fence = !in_fence;
                continue;
            }
            if in_fence || !is_heading(line) {
                continue;
            }
            let depth = positions.len();
            if depth == address.len() {
                break;
            }
            if depth > 0 && heading_level(line) <= depth {
                break;
            }
            if line.trim_end() == heading(depth + 1, &address.segments()[depth]) {
                positions.push(i);
            }
        }
        positions
    }

    fn create_headings(archive: &mut LineBuffer, address: &Address, found: &[usize]) -> usize {
        let mut missing: Vec<String> = (found.len()..address.len())
            .map(|depth| heading(depth + 1, &address.segments()[depth]))
            .collect();
        let created = missing.len();

        let at = match found.last() {
            Some(&deepest) => deepest + 1 + content_height(archive.lines(), deepest + 1),
            None => topics(archive.lines())
                .first()
                .map(|t| t.range.start)
                .unwrap_or(archive.len()),
        };
        if at > 0 && archive.line(at - 1).is_some_and(|l| !is_blank(l)) {
            missing.insert(0, String::new());
        }
        archive.insert_all(at, missing);
        created
    }

    fn trimmed(lines: &[String]) -> &[String] {
        let keep = lines.len() - lines.iter().rev().take_while(|l| is_blank(l)).count();
        &lines[..keep]
    }

    /// Length of `existing` when `incoming` starts with all of it, else 0.
    pub fn duplicate_prefix(existing: &[String], incoming: &[String]) -> usize {
        if !existing.is_empty() && incoming.starts_with(existing) {
            existing.len()
        } else {
            0
        }
    }

}

pub mod executions {
    //! Results log of shell requests, one `<output path>:<exit code>` line per run.
    //! A line with an empty or non-numeric code belongs to a command still running.

    use crate::buffer::{BufferError, LineBuffer};
    use indexmap::IndexMap;
    use serde::Serialize;
    use std::path::{Path, PathBuf};
    use tracing::warn;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "snake_case")]
    pub enum ExecutionState {
        Running,
        Finished(i32),
    }

    #[derive(Debug, Clone, Default)]
    pub struct ExecutionLog {
        buffer: LineBuffer,
        entries: IndexMap<String, ExecutionState>,
    }

    fn parse_line(line: &str) -> Option<(String, ExecutionState)> {
        let (path, code) = line.rsplit_once(':')?;
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        let state = match code.trim().parse::<i32>() {
            Ok(code) => ExecutionState::Finished(code),
            Err(_) => ExecutionState::Running,
        };
        Some((path.to_string(), state))
    }

    impl ExecutionLog {
        /// Missing file reads as an empty log.
        pub fn load(path: impl Into<PathBuf>) -> Result<Self, BufferError> {
            Ok(Self::from_buffer(LineBuffer::load(path)?))
        }

        pub fn from_buffer(buffer: LineBuffer) -> Self {
            let mut entries = IndexMap::new();
            for line in buffer.lines().iter().filter(|l| !l.trim().is_empty()) {
                match parse_line(line) {
                    Some((path, state)) => {
                        entries.shift_remove(&path);
                        entries.insert(path, state);
                    }
                    None => warn!(line = %line, "unreadable executions log entry"),
                }
            }
            Self { buffer, entries }
        }

        pub fn entries(&self) -> &IndexMap<String, ExecutionState> {
            &self.entries
        }

        pub fn running(&self) -> usize {
            self.entries
                .values()
                .filter(|s| **s == ExecutionState::Running)
                .count()
        }

        /// Exit code for the output behind a link target such as `./files/cmd.log`.
        pub fn completion_for(&self, target: &str) -> Option<i32> {
            let needle = link_suffix(target);
            self.entries
                .iter()
                .rev()
                .filter(|(path, _)| path.ends_with(needle))
                .find_map(|(_, state)| match state {
                    ExecutionState::Finished(code) => Some(*code),
                    ExecutionState::Running => None,
                })
        }

        /// Drop every entry for `target`; returns how many log lines went away.
        pub fn forget(&mut self, target: &str) -> usize {
            let needle = link_suffix(target);
            self.entries.retain(|path, _| !path.ends_with(needle));
            let stale: Vec<usize> = self
                .buffer
                .lines()
                .iter()
                .enumerate()
                .filter(|(_, l)| parse_line(l).is_some_and(|(p, _)| p.ends_with(needle)))
                .map(|(i, _)| i)
                .collect();
            for &i in stale.iter().rev() {
                self.buffer.remove_line(i);
            }
            stale.len()
        }

        pub fn save(&mut self) -> Result<(), BufferError> {
            self.buffer.save()
        }
    }

    fn link_suffix(target: &str) -> &str {
        target.strip_prefix('.').unwrap_or(target)
    }

    /// `dir/cmd.log` finished with 2 becomes `dir/cmd.2.log`.
    pub fn with_exit_code(path: &Path, code: i32) -> PathBuf {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match path.extension() {
            Some(ext) => format!("{stem}.{code}.{}", ext.to_string_lossy()),
            None => format!("{stem}.{code}"),
        };
        path.with_file_name(name)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::fs;

        #[test]
        fn later_lines_win_and_running_is_not_complete() {
            let log = ExecutionLog::from_buffer(LineBuffer::from_lines([
                "/home/u/notes/files/cmd.log:",
                "/home/u/notes/files/build.log:1",
                "garbage",
                "/home/u/notes/files/cmd.log:0",
                "/home/u/notes/files/tail.log:   ",
            ]));
            assert_eq!(log.entries().len(), 3);
            assert_eq!(log.completion_for("./files/cmd.log"), Some(0));
            assert_eq!(log.completion_for("./files/build.log"), Some(1));
            assert_eq!(log.completion_for("./files/tail.log"), None);
            assert_eq!(log.completion_for("./files/none.log"), None);
            assert_eq!(log.running(), 1);
        }

        #[test]
        fn forget_rewrites_log_file() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("executions.log");
            fs::write(&path, "/n/files/a.log:0\n/n/files/b.log:3\n").expect("seed log");

            let mut log = ExecutionLog::load(&path).expect("load");
            assert_eq!(log.forget("./files/a.log"), 1);
            log.save().expect("save");
            assert_eq!(fs::read_to_string(&path).expect("read"), "/n/files/b.log:3\n");
        }

        #[test]
        fn missing_log_is_empty() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let log = ExecutionLog::load(tmp.path().join("nope.log")).expect("load");
            assert!(log.entries().is_empty());
        }

        #[test]
        fn exit_code_goes_before_extension() {
            assert_eq!(
                with_exit_code(Path::new("files/cmd.log"), 2),
                PathBuf::from("files/cmd.2.log")
            );
            assert_eq!(
                with_exit_code(Path::new("files/out"), 0),
                PathBuf::from("files/out.0")
            );
        }
    }
}

pub mod config {
    //! Optional JSON settings; every key may be omitted.

    use anyhow::{Context, Result};
    use serde::{Deserialize, Serialize};
    use std::{
        fs,
        path::{Path, PathBuf},
    };
    use uuid::Uuid;

    pub const MEMORIES_DIR_NAME: &str = "taskflow_memories";

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Settings {
        /// Default archive for completed topics.
        pub archive: Option<PathBuf>,
        /// Results log written by shell requests.
        pub executions_log: Option<PathBuf>,
        /// Where the pre-save copy of the document goes.
        pub memories_dir: Option<PathBuf>,
        /// Maintain the `>>> (Active) <<<` topic.
        pub overview: bool,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                archive: None,
                executions_log: None,
                memories_dir: None,
                overview: true,
            }
        }
    }

    impl Settings {
        /// Read a settings file; relative paths inside it are taken from its directory.
        pub fn load(path: &Path) -> Result<Self> {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading settings {:?}", path))?;
            let mut settings: Settings = serde_json::from_str(&text)
                .with_context(|| format!("parsing settings {:?}", path))?;
            if let Some(base) = path.parent() {
                for slot in [
                    &mut settings.archive,
                    &mut settings.executions_log,
                    &mut settings.memories_dir,
                ] {
                    if let Some(p) = slot.as_mut() {
                        if p.is_relative() {
                            *p = base.join(&*p);
                        }
                    }
                }
            }
            Ok(settings)
        }

        /// Configured directory, or a fresh one under the system temp dir.
        pub fn memories_dir(&self) -> PathBuf {
            self.memories_dir.clone().unwrap_or_else(|| {
                std::env::temp_dir()
                    .join(MEMORIES_DIR_NAME)
                    .join(Uuid::new_v4().to_string())
            })
        }
    }

}

pub mod passes {
    //! Rewrites applied to the document on every run. Each pass leaves its own
    //! output untouched when run again.

    use crate::archive::{self, ArchiveEntry};
    use crate::buffer::{BufferError, LineBuffer, trim_trailing_blank};
    use crate::core::{ADDRESS_SEPARATOR, Address, LineRange, Status, Topic};
    use crate::executions::{ExecutionLog, with_exit_code};
    use crate::grammar::{
        EMPTY_CHECKBOX, FENCE, checkbox, demote_checkbox, find_links, heading, indent_width, is_blank,
        is_checkbox, is_fence, is_heading, line_title, replace_link_target, set_status, status,
        strip_indent, topic_status,
    };
    use crate::groups::{extract_check_groups, group_padding};
    use crate::scanner::{self, fence_mask, section};
    use crate::tree::{TaskId, TaskTree};
    use chrono::NaiveDate;
    use indexmap::IndexMap;
    use std::{
        collections::BTreeSet,
        fs,
        path::{Path, PathBuf},
    };
    use tracing::{debug, info, warn};

    pub const OVERVIEW_TITLE: &str = ">>> (Active) <<<";
    pub const OVERVIEW_HEADING: &str = "# >>> (Active) <<<";
    const OVERVIEW_INDENT: &str = "    ";
    const QUESTION: &str = "? - ";
    pub const DIVE_IN_INTRO: &str = "dive-in:";
    const DIVE_IN_FENCE: &str = "```sh";
    const DIVE_IN_DEFAULT: &str = "git checkout branch_name";

    fn is_generated(lines: &[String], topic: &Topic) -> bool {
        lines[topic.range.start].trim_end() == OVERVIEW_HEADING
    }

    /// Topics written by the user, the generated overview left out.
    fn authored_topics(lines: &[String]) -> Vec<Topic> {
        scanner::topics(lines)
            .into_iter()
            .filter(|t| !is_generated(lines, t))
            .collect()
    }

    fn derived_heading(topic_title: &str, item_title: &str) -> String {
        heading(
            1,
            &format!("{} {topic_title} {ADDRESS_SEPARATOR} {item_title}", Status::Open),
        )
    }

    /* --------------------------- 1. root topic --------------------------- */

    /// An untitled document gets a dated heading on top.
    pub fn ensure_root_topic(doc: &mut LineBuffer, today: NaiveDate) -> bool {
        match doc.line(0) {
            None => false,
            Some(first) if first.starts_with("# ") => false,
            Some(_) => {
                let title = format!("{} {}", Status::Open, today.format("%Y.%m.%d"));
                doc.insert(0, heading(1, &title));
                debug!(%title, "added root topic");
                true
            }
        }
    }

    /* ----------------------------- 2. dive-in ----------------------------- */

    /// A topic whose first body line is blank gets a `dive-in:` shell block in
    /// its place. The script is copied from the topic named by the first
    /// address segment when that topic has one.
    pub fn insert_dive_in_blocks(doc: &mut LineBuffer) -> usize {
        let mut inserted = 0;
        for topic in authored_topics(doc.lines()).iter().rev() {
            let first = topic.range.start + 1;
            if first > topic.range.end || !is_blank(&doc.lines()[first]) {
                continue;
            }
            let address = Address::parse(&line_title(&doc.lines()[topic.range.start]));
            let inherited = match address.segments().first() {
                Some(root) if address.is_virtual() => {
                    let topics = scanner::topics(doc.lines());
                    scanner::topic_by_title(doc.lines(), &topics, root)
                        .map(|parent| dive_in_script(doc.lines(), parent))
                        .unwrap_or_default()
                }
                _ => Vec::new(),
            };

            let mut block = vec![DIVE_IN_INTRO.to_string(), DIVE_IN_FENCE.to_string()];
            if inherited.is_empty() {
                block.push(DIVE_IN_DEFAULT.to_string());
            } else {
                block.extend(inherited);
            }
            block.push(FENCE.to_string());

            doc.remove_line(first);
            doc.insert_all(first, block);
            inserted += 1;
            debug!(%address, "dive-in block added");
        }
        inserted
    }

    /// Script lines of the `dive-in:` block opening `topic`, if any.
    pub fn dive_in_script(lines: &[String], topic: &Topic) -> Vec<String> {
        let intro = topic.range.start + 1;
        let opens = lines.get(intro).is_some_and(|l| l.starts_with(DIVE_IN_INTRO))
            && lines.get(intro + 1).is_some_and(|l| l.starts_with(DIVE_IN_FENCE));
        if !opens {
            return Vec::new();
        }
        lines
            .iter()
            .skip(intro + 2)
            .take_while(|l| !l.starts_with(FENCE))
            .cloned()
            .collect()
    }

    /* -------------------------- 3. comment blocks ------------------------- */

    /// Indented prose under a checkbox moves into a topic of its own.
    pub fn extract_comment_blocks(doc: &mut LineBuffer) -> usize {
        let mut created = 0;
        for topic in authored_topics(doc.lines()).iter().rev() {
            let topic_title = line_title(&doc.lines()[topic.range.start]);
            let mask = fence_mask(doc.lines(), topic.range);
            let boxes: Vec<usize> = topic
                .range
                .lines()
                .filter(|&i| !mask[i - topic.range.start] && is_checkbox(&doc.lines()[i]))
                .collect();

            let mut limit = topic.range.end;
            let mut new_topics: Vec<Vec<String>> = Vec::new();
            for &at in boxes.iter().rev() {
                let Some(cb) = checkbox(&doc.lines()[at]) else {
                    continue;
                };
                if cb.title.is_empty() {
                    continue;
                }
                let (item_title, was_open) = (cb.title.to_string(), cb.status == Status::Open);
                let Some(last) = comment_end(doc.lines(), at, limit, cb.padding.len()) else {
                    continue;
                };

                let block = &doc.lines()[at + 1..=last];
                let indent = block
                    .iter()
                    .filter(|l| !is_blank(l))
                    .map(|l| indent_width(l))
                    .min()
                    .unwrap_or(0);
                let mut lines = vec![derived_heading(&topic_title, &item_title)];
                lines.extend(block.iter().map(|l| {
                    if is_blank(l) {
                        String::new()
                    } else {
                        strip_indent(l, indent).to_string()
                    }
                }));
                lines.push(String::new());
                let marked = if was_open {
                    set_status(&doc.lines()[at], Status::Extracted)
                } else {
                    None
                };

                doc.remove(at + 1, last);
                limit -= last - at;
                if let Some(marked) = marked {
                    doc.update(at, marked);
                }
                debug!(topic = %topic_title, item = %item_title, "comment block extracted");
                new_topics.push(lines);
            }

            if !new_topics.is_empty() {
                created += new_topics.len();
                new_topics.reverse();
                doc.insert_all(topic.range.start, new_topics.concat());
            }
        }
        created
    }

    /// Last line of the comment under the checkbox at `at`: non-blank lines
    /// indented deeper than the checkbox, up to the next checkbox.
    fn comment_end(lines: &[String], at: usize, limit: usize, padding: usize) -> Option<usize> {
        let mut last = None;
        let mut in_fence = false;
        for (i, line) in lines.iter().enumerate().take(limit + 1).skip(at + 1) {
            if is_blank(line) {
                continue;
            }
            if indent_width(line) <= padding {
                break;
            }
            if is_fence(line) {
                in_fence = !in_fence;
            } else if !in_fence && is_checkbox(line) {
                break;
            }
            last = Some(i);
        }
        last
    }

    /* -------------------------- 4. nested subtasks ------------------------ */

    /// Checkboxes nested under an extracted (`^`) checkbox move into a topic of their own.
    pub fn extract_nested_subtasks(doc: &mut LineBuffer) -> usize {
        let mut moved = 0;
        while let Some((topic, at, last)) = next_nested_run(doc.lines()) {
            let lines = doc.lines();
            let topic_title = line_title(&lines[topic.range.start]);
            let item_title = line_title(&lines[at]);
            let run = &lines[at + 1..=last];
            let indent = run.iter().map(|l| indent_width(l)).min().unwrap_or(0);

            let mut block = vec![derived_heading(&topic_title, &item_title)];
            block.extend(run.iter().map(|l| strip_indent(l, indent).to_string()));
            block.push(String::new());

            doc.remove(at + 1, last);
            doc.insert_all(topic.range.start, block);
            debug!(topic = %topic_title, item = %item_title, "nested subtasks extracted");
            moved += 1;
        }
        moved
    }

    fn next_nested_run(lines: &[String]) -> Option<(Topic, usize, usize)> {
        for topic in authored_topics(lines) {
            let mask = fence_mask(lines, topic.range);
            for at in topic.range.lines() {
                if mask[at - topic.range.start] {
                    continue;
                }
                let Some(cb) = checkbox(&lines[at]) else {
                    continue;
                };
                if cb.status != Status::Extracted {
                    continue;
                }
                let depth = cb.padding.len();
                let last = (at + 1..=topic.range.end)
                    .take_while(|&j| checkbox(&lines[j]).is_some_and(|c| c.padding.len() > depth))
                    .last();
                if let Some(last) = last {
                    return Some((topic, at, last));
                }
            }
        }
        None
    }

    /* ------------------------- 5. trailing checkbox ------------------------ */

    /// Every unfinished group ends with an empty checkbox ready to type into.
    pub fn inject_trailing_checkboxes(doc: &mut LineBuffer) -> usize {
        let lines = doc.lines();
        let Some(range) = LineRange::of(lines) else {
            return 0;
        };
        let generated: Vec<LineRange> = scanner::topics(lines)
            .into_iter()
            .filter(|t| is_generated(lines, t))
            .map(|t| t.range)
            .collect();

        let mut insertions: Vec<(usize, usize, String)> = Vec::new();
        for group in extract_check_groups(lines, range) {
            if generated.iter().any(|g| g.contains(&group.range)) {
                continue;
            }
            let padding = group_padding(lines, &group);
            if group_is_done(lines, &group.range, padding) {
                continue;
            }
            let empty = format!("{padding}{EMPTY_CHECKBOX}");
            if lines[group.range.end].trim_end() == empty {
                continue;
            }
            insertions.push((group.range.end + 1, padding.len(), format!("{empty} ")));
        }

        // Deeper groups closing on the same line get their checkbox first.
        insertions.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        let count = insertions.len();
        for (at, _, line) in insertions {
            doc.insert(at, line);
        }
        count
    }

    fn group_is_done(lines: &[String], range: &LineRange, padding: &str) -> bool {
        if !padding.is_empty() && range.start > 0 {
            let parent_done = status(lines[range.start - 1].trim_start()) == Some(Status::Done);
            if !parent_done {
                return false;
            }
        }
        range
            .lines()
            .all(|i| status(&lines[i]) == Some(Status::Done))
    }

    /* ----------------------------- 6. archive ----------------------------- */

    /// Completed topics leave the document and are merged into their archive.
    /// Topics with no archive to go to stay where they are.
    pub fn archive_completed_topics(
        doc: &mut LineBuffer,
        default_archive: Option<&Path>,
        doc_dir: &Path,
    ) -> Result<usize, BufferError> {
        let mut pending: IndexMap<PathBuf, Vec<ArchiveEntry>> = IndexMap::new();
        let mut archived = 0;
        let mut cursor = doc.len();

        loop {
            let topics = authored_topics(doc.lines());
            let Some(index) = topics.iter().rposition(|t| {
                t.range.start < cursor
                    && topic_status(&doc.lines()[t.range.start]) == Some(Status::Done)
            }) else {
                break;
            };
            let topic = topics[index];
            cursor = topic.range.start;

            let mut address = topic_address(doc.lines(), &topics, index);
            let destination =
                redirect(&mut address, doc_dir).or_else(|| default_archive.map(Path::to_path_buf));
            let Some(destination) = destination else {
                debug!(line = topic.range.start + 1, "completed topic has no archive");
                continue;
            };
            if address.is_empty() {
                warn!(line = topic.range.start + 1, "completed topic has no title to archive under");
                continue;
            }

            let span = section(&topics, index);
            let lines = archived_body(doc.lines(), span, address.len(), topic.level);
            doc.remove(span.start, span.end);

            if let Some(origin) = origin_checkbox(doc.lines(), &address) {
                if let Some(done) = set_status(&doc.lines()[origin], Status::Done) {
                    doc.update(origin, done);
                }
            }

            debug!(%address, ?destination, lines = lines.len(), "topic archived");
            pending
                .entry(destination)
                .or_default()
                .insert(0, ArchiveEntry { lines, address });
            archived += 1;
        }

        for (path, entries) in pending {
            let mut target = LineBuffer::load(&path)?;
            for entry in &entries {
                archive::merge(&mut target, entry);
            }
            target.trim_trailing_empty();
            target.save()?;
            info!(?path, entries = entries.len(), "archive updated");
        }
        Ok(archived)
    }

    /// Titles of the enclosing shallower headings plus the topic's own title.
    /// A top-level topic uses its own `A -> B` title instead.
    fn topic_address(lines: &[String], topics: &[Topic], index: usize) -> Address {
        let own = line_title(&lines[topics[index].range.start]);
        let mut chain = vec![own];
        let mut level = topics[index].level;
        for t in topics[..index].iter().rev() {
            if level <= 1 {
                break;
            }
            if t.level < level {
                chain.insert(0, line_title(&lines[t.range.start]));
                level = t.level;
            }
        }
        if chain.len() == 1 {
            Address::parse(&chain[0])
        } else {
            Address(chain)
        }
    }

    /// A leading `[[name]]` segment sends the entry to `name.md` beside the document.
    fn redirect(address: &mut Address, doc_dir: &Path) -> Option<PathBuf> {
        let first = address.0.first()?;
        let name = first.strip_prefix("[[")?.strip_suffix("]]")?.trim().to_string();
        address.0.remove(0);
        let file = if name.to_lowercase().ends_with(".md") {
            name
        } else {
            format!("{name}.md")
        };
        Some(doc_dir.join(file))
    }

    fn archived_body(lines: &[String], span: LineRange, depth: usize, level: usize) -> Vec<String> {
        if span.end <= span.start {
            return Vec::new();
        }
        let body = LineRange::new(span.start + 1, span.end);
        let mask = fence_mask(lines, body);
        let placeholders: BTreeSet<usize> = extract_check_groups(lines, body)
            .iter()
            .map(|g| g.range.end)
            .filter(|&end| lines[end].trim() == EMPTY_CHECKBOX)
            .collect();
        let extra = "#".repeat(depth.saturating_sub(level));

        let mut out = Vec::with_capacity(body.len());
        for (offset, i) in body.lines().enumerate() {
            if placeholders.contains(&i) {
                continue;
            }
            let line = &lines[i];
            let rewritten = if mask[offset] {
                line.clone()
            } else if let Some(bullet) = demote_checkbox(line) {
                bullet
            } else if is_heading(line) {
                format!("{extra}{line}")
            } else {
                line.clone()
            };
            out.push(rewritten);
        }
        trim_trailing_blank(&mut out);
        out
    }

    /// The `^` checkbox an archived topic was extracted from.
    fn origin_checkbox(lines: &[String], address: &Address) -> Option<usize> {
        let (leaf, parents) = address.segments().split_last()?;
        if parents.is_empty() {
            return None;
        }
        let topics = authored_topics(lines);
        let mut current: Option<Topic> = None;
        for segment in parents {
            let after = current.map(|t| t.range.start);
            let found = topics.iter().find(|t| {
                after.is_none_or(|a| t.range.start > a) && line_title(&lines[t.range.start]) == *segment
            })?;
            current = Some(*found);
        }
        let topic = current?;
        topic.range.lines().find(|&i| {
            checkbox(&lines[i])
                .is_some_and(|cb| cb.status == Status::Extracted && cb.title == leaf.as_str())
        })
    }

    /* ---------------------------- 7. questions ---------------------------- */

    /// `- [ ] why? - because` is an answered question and counts as done.
    pub fn mark_answered_questions(doc: &mut LineBuffer) -> usize {
        let lines = doc.lines();
        let mask = LineRange::of(lines)
            .map(|r| fence_mask(lines, r))
            .unwrap_or_default();
        let mut answered = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if mask[i] || status(line) != Some(Status::Open) {
                continue;
            }
            let Some(at) = line.find(QUESTION) else {
                continue;
            };
            // An answer needs at least two characters.
            let answer = &line[at + QUESTION.len()..];
            if answer.chars().count() < 2 || answer.trim().is_empty() {
                continue;
            }
            if let Some(done) = set_status(line, Status::Done) {
                answered.push((i, done));
            }
        }
        let count = answered.len();
        for (i, line) in answered {
            doc.update(i, line);
        }
        count
    }

    /* ---------------------------- 8. commands ----------------------------- */

    /// Finished shell requests get their exit code baked into the output file name.
    pub fn resolve_command_links(doc: &mut LineBuffer, log: &mut ExecutionLog, doc_dir: &Path) -> usize {
        let mask = LineRange::of(doc.lines())
            .map(|r| fence_mask(doc.lines(), r))
            .unwrap_or_default();
        let mut resolved = 0;
        for i in 0..doc.len() {
            if mask[i] {
                continue;
            }
            let current = doc.lines()[i].clone();
            let mut rewritten = current.clone();
            for link in find_links(&current).iter().rev() {
                if !link.is_command() || link.target.trim().is_empty() {
                    continue;
                }
                let Some(code) = log.completion_for(link.target) else {
                    continue;
                };
                let source = resolve_link(doc_dir, link.target);
                if !source.exists() {
                    continue;
                }
                let renamed = with_exit_code(&source, code);
                if let Err(err) = fs::rename(&source, &renamed) {
                    warn!(?source, error = %err, "could not rename command output");
                    continue;
                }
                let file_name = renamed
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let target = match link.target.rfind('/') {
                    Some(at) => format!("{}{file_name}", &link.target[..=at]),
                    None => file_name,
                };
                rewritten = replace_link_target(&rewritten, link, &target);
                log.forget(link.target);
                debug!(command = link.title, code, %target, "command output resolved");
                resolved += 1;
            }
            if rewritten != current {
                doc.update(i, rewritten);
            }
        }
        resolved
    }

    /// Targets starting with `./` or `../` are relative to the document.
    pub fn resolve_link(doc_dir: &Path, target: &str) -> PathBuf {
        if target.starts_with("./") || target.starts_with("../") {
            doc_dir.join(target)
        } else {
            PathBuf::from(target)
        }
    }

    /* ----------------------------- 9. spacing ----------------------------- */

    /// One blank line above every topic; no blank lines at the end.
    pub fn normalize_spacing(doc: &mut LineBuffer) -> usize {
        let starts: Vec<usize> = doc
            .topics()
            .iter()
            .map(|t| t.range.start)
            .filter(|&s| s > 0)
            .collect();
        let mut inserted = 0;
        for &start in starts.iter().rev() {
            if doc.line(start - 1).is_some_and(|l| !is_blank(l)) {
                doc.insert(start, "");
                inserted += 1;
            }
        }
        doc.trim_trailing_empty();
        inserted
    }

    /* ----------------------------- 10. overview ---------------------------- */

    /// Rebuild the in-progress overview at the top of the document.
    pub fn refresh_overview(doc: &mut LineBuffer, doc_name: &str) -> bool {
        let mut body: Vec<String> = doc.lines().to_vec();
        if let Some(stale) = scanner::topics(&body)
            .into_iter()
            .find(|t| is_generated(&body, t))
        {
            body.drain(stale.range.lines());
        }

        let active = TaskTree::build(&body).prune(Status::InProgress);
        let mut expected = overview_lines(&active, doc_name);
        expected.extend(body);
        if expected == doc.lines() {
            return false;
        }
        doc.remove(0, doc.len().saturating_sub(1));
        doc.insert_all(0, expected);
        debug!("overview refreshed");
        true
    }

    fn overview_lines(active: &TaskTree, doc_name: &str) -> Vec<String> {
        if active.roots().is_empty() {
            return Vec::new();
        }
        let mut items: Vec<(TaskId, usize)> = Vec::new();
        let mut stack: Vec<(TaskId, usize)> = active.roots().iter().rev().map(|&id| (id, 0)).collect();
        while let Some((id, depth)) = stack.pop() {
            items.push((id, depth));
            stack.extend(active.children(id).iter().rev().map(|&c| (c, depth + 1)));
        }

        // Heading, one line per item, then a blank line.
        let height = items.len() + 2;
        let mut out = Vec::with_capacity(height);
        out.push(OVERVIEW_HEADING.to_string());
        for (id, depth) in items {
            let task = active.task(id);
            let indent = OVERVIEW_INDENT.repeat(depth);
            let title = unwrap_wiki(&task.title);
            match task.line_index {
                Some(li) if task.is_leaf() => {
                    out.push(format!("{indent}- [{title}]({doc_name}#L{})", li + height + 1))
                }
                _ => out.push(format!("{indent}- {title}")),
            }
        }
        out.push(String::new());
        out
    }

    fn unwrap_wiki(title: &str) -> &str {
        title
            .strip_prefix("[[")
            .and_then(|t| t.strip_suffix("]]"))
            .unwrap_or(title)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn doc(src: &[&str]) -> LineBuffer {
            LineBuffer::from_lines(src.iter().copied())
        }

        fn day() -> NaiveDate {
            NaiveDate::from_ymd_opt(2024, 3, 9).expect("valid date")
        }

        #[test]
        fn untitled_document_gets_dated_topic() {
            let mut d = doc(&["- [ ] first"]);
            assert!(ensure_root_topic(&mut d, day()));
            assert_eq!(d.lines(), ["# [ ] 2024.03.09", "- [ ] first"]);
            assert!(!ensure_root_topic(&mut d, day()));

            let mut empty = doc(&[]);
            assert!(!ensure_root_topic(&mut empty, day()));
        }

        #[test]
        fn blank_topic_opening_gets_dive_in_block() {
            let mut d = doc(&[
                "# [ ] Proj",
                "dive-in:",
                "```sh",
                "cd ~/proj",
                "git pull",
                "```",
                "- [ ] build",
                "",
                "# [ ] Proj -> build",
                "",
                "- [ ] compile",
                "",
                "# [ ] Other",
                "",
                "- [ ] x",
            ]);
            assert_eq!(insert_dive_in_blocks(&mut d), 2);
            assert_eq!(
                d.lines()[8..],
                [
                    "# [ ] Proj -> build",
                    "dive-in:",
                    "```sh",
                    "cd ~/proj",
                    "git pull",
                    "```",
                    "- [ ] compile",
                    "",
                    "# [ ] Other",
                    "dive-in:",
                    "```sh",
                    "git checkout branch_name",
                    "```",
                    "- [ ] x",
                ]
            );
            assert_eq!(insert_dive_in_blocks(&mut d), 0);
        }

        #[test]
        fn dive_in_skips_overview_and_bodiless_topics() {
            let mut d = doc(&[OVERVIEW_HEADING, "", "# [ ] Last"]);
            assert_eq!(insert_dive_in_blocks(&mut d), 0);
            assert!(!d.has_changed());
        }

        #[test]
        fn comment_block_becomes_topic() {
            let mut d = doc(&[
                "# [ ] Work",
                "- [ ] deploy",
                "    check logs",
                "",
                "      then notify",
                "- [x] done item",
                "  closing note",
            ]);
            assert_eq!(extract_comment_blocks(&mut d), 2);
            assert_eq!(
                d.lines(),
                [
                    "# [ ] Work -> deploy",
                    "check logs",
                    "",
                    "  then notify",
                    "",
                    "# [ ] Work -> done item",
                    "closing note",
                    "",
                    "# [ ] Work",
                    "- [^] deploy",
                    "- [x] done item",
                ]
            );
            assert_eq!(extract_comment_blocks(&mut d), 0);
        }

        #[test]
        fn nested_checkboxes_under_extracted_item_move_out() {
            let mut d = doc(&[
                "# [ ] Work",
                "- [^] deploy",
                "  - [ ] build",
                "    - [ ] test",
                "- [ ] other",
            ]);
            assert_eq!(extract_nested_subtasks(&mut d), 1);
            assert_eq!(
                d.lines(),
                [
                    "# [ ] Work -> deploy",
                    "- [ ] build",
                    "  - [ ] test",
                    "",
                    "# [ ] Work",
                    "- [^] deploy",
                    "- [ ] other",
                ]
            );
            assert_eq!(extract_nested_subtasks(&mut d), 0);
        }

        #[test]
        fn trailing_checkboxes_follow_nesting() {
            let mut d = doc(&["# [ ] T", "- [ ] a", "  - [ ] b", "# [ ] Done", "- [x] c"]);
            assert_eq!(inject_trailing_checkboxes(&mut d), 2);
            assert_eq!(
                d.lines(),
                [
                    "# [ ] T",
                    "- [ ] a",
                    "  - [ ] b",
                    "  - [ ] ",
                    "- [ ] ",
                    "# [ ] Done",
                    "- [x] c",
                ]
            );
            assert_eq!(inject_trailing_checkboxes(&mut d), 0);
        }

        #[test]
        fn finished_nested_group_under_open_parent_still_gets_one() {
            let mut d = doc(&["# T", "- [ ] a", "  - [x] b", "- [ ]"]);
            assert_eq!(inject_trailing_checkboxes(&mut d), 1);
            assert_eq!(d.lines(), ["# T", "- [ ] a", "  - [x] b", "  - [ ] ", "- [ ]"]);
        }

        #[test]
        fn completed_topic_moves_to_archive() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let archive_path = tmp.path().join("archive.md");
            let mut d = doc(&[
                "# [ ] Proj",
                "- [^] ship",
                "- [ ] ",
                "",
                "# [x] Proj -> ship",
                "- [x] build",
                "  - [x] test",
                "- [ ] ",
                "## notes",
                "fine",
            ]);

            let archived =
                archive_completed_topics(&mut d, Some(&archive_path), tmp.path()).expect("archive");
            assert_eq!(archived, 1);
            assert_eq!(d.lines(), ["# [ ] Proj", "- [x] ship", "- [ ] ", ""]);
            assert_eq!(
                fs::read_to_string(&archive_path).expect("archive written"),
                "# Proj\n## ship\n- build\n  - test\n### notes\nfine\n"
            );
        }

        #[test]
        fn nested_topic_address_and_redirect() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let mut d = doc(&[
                "# [[journal]]",
                "## Week",
                "### [x] Review",
                "- [x] read",
                "# Other",
            ]);
            let archived = archive_completed_topics(&mut d, None, tmp.path()).expect("archive");
            assert_eq!(archived, 1);
            assert_eq!(d.lines(), ["# [[journal]]", "## Week", "# Other"]);
            assert_eq!(
                fs::read_to_string(tmp.path().join("journal.md")).expect("journal written"),
                "# Week\n## Review\n- read\n"
            );
        }

        #[test]
        fn completed_topic_without_archive_stays() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let mut d = doc(&["# [x] Solo", "- [x] a"]);
            let archived = archive_completed_topics(&mut d, None, tmp.path()).expect("archive");
            assert_eq!(archived, 0);
            assert!(!d.has_changed());
        }

        #[test]
        fn answered_questions_close() {
            let mut d = doc(&[
                "- [ ] which port? - 8080",
                "- [ ] which host? - ",
                "- [ ] which user? - a",
                "- [-] why? - because",
                "```",
                "- [ ] in code? - yes",
                "```",
            ]);
            assert_eq!(mark_answered_questions(&mut d), 1);
            assert_eq!(d.line(0), Some("- [x] which port? - 8080"));
            assert_eq!(d.line(1), Some("- [ ] which host? - "));
            assert_eq!(d.line(2), Some("- [ ] which user? - a"));
            assert_eq!(d.line(5), Some("- [ ] in code? - yes"));
        }

        #[test]
        fn finished_command_output_is_renamed() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let files = tmp.path().join("files");
            fs::create_dir_all(&files).expect("files dir");
            fs::write(files.join("cmd.log"), "ok\n").expect("output");
            let log_path = tmp.path().join("executions.log");
            fs::write(
                &log_path,
                format!("{}:0\n", files.join("cmd.log").display()),
            )
            .expect("log");

            let mut log = ExecutionLog::load(&log_path).expect("log");
            let mut d = doc(&["- [ ] run [`ls`](./files/cmd.log) [`x`](./files/other.log)"]);
            assert_eq!(resolve_command_links(&mut d, &mut log, tmp.path()), 1);
            assert_eq!(
                d.line(0),
                Some("- [ ] run [`ls`](./files/cmd.0.log) [`x`](./files/other.log)")
            );
            assert!(files.join("cmd.0.log").exists());
            assert!(log.entries().is_empty());
        }

        #[test]
        fn spacing_is_normalized() {
            let mut d = doc(&["# A", "a", "# B", "", "# C", "", ""]);
            assert_eq!(normalize_spacing(&mut d), 1);
            assert_eq!(d.lines(), ["# A", "a", "", "# B", "", "# C"]);
        }

        #[test]
        fn overview_lists_in_progress_work() {
            let mut d = doc(&[
                "# [ ] Proj",
                "- [-] wiring",
                "- [ ] later",
                "",
                "# [-] [[Focus]]",
            ]);
            assert!(refresh_overview(&mut d, "tasks.md"));
            assert_eq!(
                d.lines(),
                [
                    "# >>> (Active) <<<",
                    "- Proj",
                    "    - [wiring](tasks.md#L7)",
                    "- [Focus](tasks.md#L10)",
                    "",
                    "# [ ] Proj",
                    "- [-] wiring",
                    "- [ ] later",
                    "",
                    "# [-] [[Focus]]",
                ]
            );
            assert_eq!(d.line(6), Some("- [-] wiring"));
            assert_eq!(d.line(9), Some("# [-] [[Focus]]"));
            assert!(!refresh_overview(&mut d, "tasks.md"));
        }

        #[test]
        fn overview_disappears_when_nothing_is_active() {
            let mut d = doc(&["# >>> (Active) <<<", "- [gone](tasks.md#L5)", "", "# [ ] A"]);
            assert!(refresh_overview(&mut d, "tasks.md"));
            assert_eq!(d.lines(), ["# [ ] A"]);
        }
    }
}

pub mod pipeline {
    //! One run over a document: every pass in order, then a save guarded by a
    //! copy of the previous file.

    use crate::buffer::LineBuffer;
    use crate::config::Settings;
    use crate::executions::ExecutionLog;
    use crate::passes;
    use anyhow::{Context, Result};
    use chrono::NaiveDate;
    use serde::Serialize;
    use std::{
        fs,
        path::{Path, PathBuf},
    };
    use tracing::{debug, info};

    /// File name used in overview links when the document has no path.
    pub const DEFAULT_DOC_NAME: &str = "tasks.md";

    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
    pub struct RunReport {
        pub root_topic_added: bool,
        pub dive_in_blocks: usize,
        pub comment_blocks: usize,
        pub subtasks_extracted: usize,
        pub checkboxes_added: usize,
        pub topics_archived: usize,
        pub questions_answered: usize,
        pub commands_resolved: usize,
        pub commands_running: usize,
        pub blank_lines_added: usize,
        pub overview_refreshed: bool,
        /// The document differs from what was loaded.
        pub changed: bool,
        /// Where the previous version was copied before saving.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub backup: Option<PathBuf>,
    }

    #[derive(Debug)]
    pub struct Pipeline {
        doc: LineBuffer,
        settings: Settings,
    }

    impl Pipeline {
        pub fn open(path: impl Into<PathBuf>, settings: Settings) -> Result<Self> {
            let path = path.into();
            let doc = LineBuffer::load(&path).with_context(|| format!("loading {:?}", path))?;
            Ok(Self::from_buffer(doc, settings))
        }

        pub fn from_buffer(doc: LineBuffer, settings: Settings) -> Self {
            Self { doc, settings }
        }

        pub fn document(&self) -> &LineBuffer {
            &self.doc
        }

        pub fn settings(&self) -> &Settings {
            &self.settings
        }

        fn doc_dir(&self) -> PathBuf {
            self.doc
                .path()
                .and_then(Path::parent)
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        }

        fn doc_name(&self) -> String {
            self.doc
                .path()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| DEFAULT_DOC_NAME.to_string())
        }

        /// Apply every pass to the in-memory document. Archives and the
        /// executions log are written as their passes complete.
        pub fn run(&mut self, today: NaiveDate) -> Result<RunReport> {
            let doc_dir = self.doc_dir();
            let doc_name = self.doc_name();
            let doc = &mut self.doc;
            let mut report = RunReport {
                root_topic_added: passes::ensure_root_topic(doc, today),
                ..RunReport::default()
            };
            report.dive_in_blocks = passes::insert_dive_in_blocks(doc);
            report.comment_blocks = passes::extract_comment_blocks(doc);
            report.subtasks_extracted = passes::extract_nested_subtasks(doc);
            report.checkboxes_added = passes::inject_trailing_checkboxes(doc);
            report.topics_archived =
                passes::archive_completed_topics(doc, self.settings.archive.as_deref(), &doc_dir)
                    .context("archiving completed topics")?;
            report.questions_answered = passes::mark_answered_questions(doc);

            if let Some(log_path) = &self.settings.executions_log {
                let log_path = relative_to(&doc_dir, log_path);
                let mut log = ExecutionLog::load(&log_path)
                    .with_context(|| format!("loading executions log {:?}", log_path))?;
                report.commands_resolved = passes::resolve_command_links(doc, &mut log, &doc_dir);
                report.commands_running = log.running();
                log.save()
                    .with_context(|| format!("writing executions log {:?}", log_path))?;
            }

            report.blank_lines_added = passes::normalize_spacing(doc);
            if self.settings.overview {
                report.overview_refreshed = passes::refresh_overview(doc, &doc_name);
            }
            report.changed = doc.has_changed();
            debug!(?report, "passes complete");
            Ok(report)
        }

        /// `run`, then save the document when it changed.
        pub fn execute(&mut self, today: NaiveDate) -> Result<RunReport> {
            let mut report = self.run(today)?;
            if self.doc.has_changed() {
                report.backup = self.make_defensive_copy()?;
                self.doc.save().context("saving document")?;
                info!(path = ?self.doc.path(), "document saved");
            }
            Ok(report)
        }

        fn make_defensive_copy(&self) -> Result<Option<PathBuf>> {
            let Some(path) = self.doc.path() else {
                return Ok(None);
            };
            if !path.exists() {
                return Ok(None);
            }
            let dir = self.settings.memories_dir();
            fs::create_dir_all(&dir).with_context(|| format!("creating {:?}", dir))?;
            let copy = dir.join(self.doc_name());
            fs::copy(path, &copy).with_context(|| format!("copying {:?} to {:?}", path, copy))?;
            debug!(?copy, "previous document kept");
            Ok(Some(copy))
        }
    }

    /// `./x` and `../x` are taken from `dir`; anything else is used as given.
    fn relative_to(dir: &Path, path: &Path) -> PathBuf {
        if path.starts_with(".") || path.starts_with("..") {
            dir.join(path)
        } else {
            path.to_path_buf()
        }
    }

}

pub use buffer::LineBuffer;
pub use config::Settings;
pub use pipeline::{Pipeline, RunReport};
pub use tree::TaskTree;
