//! Bookmark tree transform.
//!
//! Parses the Chrome `Bookmarks` JSON document into an owned tree (parents
//! exclusively own their children, no back-references) and serializes it to
//! the Netscape bookmark exchange format Zen Browser imports. The exchange
//! document can also be parsed back, both for round-trip verification and
//! for consuming third-party exports.

use anyhow::{anyhow, Result};
use ego_tree::iter::Edge;
use scraper::Html;
use serde_json::Value;
use tracing::debug;

use crate::timestamp;

/// One bookmark or folder. A node is a folder iff `url` is empty, and only
/// folders carry children. Read-only after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct BookmarkNode {
    pub title: String,
    pub url: String,
    /// Chrome timestamp (µs since 1601), 0 when unknown.
    pub created_at: i64,
    pub modified_at: i64,
    /// Titles of all ancestor folders, outermost first.
    pub folder_path: Vec<String>,
    pub children: Vec<BookmarkNode>,
}

impl BookmarkNode {
    pub fn is_folder(&self) -> bool {
        self.url.is_empty()
    }

    /// Number of leaf bookmarks in this subtree.
    pub fn leaf_count(&self) -> usize {
        if !self.is_folder() {
            1
        } else {
            self.children.iter().map(BookmarkNode::leaf_count).sum()
        }
    }
}

/// Flatten a forest into `(title, url, folder_path)` tuples in document
/// order, folders included.
pub fn flatten(nodes: &[BookmarkNode]) -> Vec<(String, String, Vec<String>)> {
    let mut out = Vec::new();
    fn walk(node: &BookmarkNode, out: &mut Vec<(String, String, Vec<String>)>) {
        out.push((node.title.clone(), node.url.clone(), node.folder_path.clone()));
        for child in &node.children {
            walk(child, out);
        }
    }
    for node in nodes {
        walk(node, &mut out);
    }
    out
}

/// Chrome serializes timestamps as JSON strings; older files carry numbers.
fn json_timestamp(value: &Value, field: &str) -> i64 {
    match value.get(field) {
        Some(v) => v
            .as_i64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
            .unwrap_or(0),
        None => 0,
    }
}

fn json_name(value: &Value) -> String {
    value
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

/// Parse the Chrome bookmarks document into one tree per root category.
///
/// A document without a `roots` object is structurally broken and a hard
/// error; a root without a `children` array (e.g. sync metadata) is
/// skipped; malformed individual entries fall back to empty strings and 0.
pub fn parse_bookmark_tree(data: &Value) -> Result<Vec<BookmarkNode>> {
    let roots = data
        .get("roots")
        .and_then(|v| v.as_object())
        .ok_or_else(|| anyhow!("Invalid bookmarks data: 'roots' not found"))?;

    let mut trees = Vec::new();
    for (category, root) in roots {
        if root.get("children").and_then(|v| v.as_array()).is_none() {
            debug!("Skipping non-bookmark root entry '{}'", category);
            continue;
        }

        let title = match root.get("name").and_then(|v| v.as_str()) {
            Some(name) => name.to_string(),
            None => category.clone(),
        };
        let mut node = BookmarkNode {
            title: title.clone(),
            url: String::new(),
            created_at: json_timestamp(root, "date_added"),
            modified_at: json_timestamp(root, "date_modified"),
            folder_path: Vec::new(),
            children: Vec::new(),
        };
        walk_children(root, &mut node, &[title]);
        trees.push(node);
    }

    Ok(trees)
}

fn walk_children(json: &Value, parent: &mut BookmarkNode, path: &[String]) {
    let Some(children) = json.get("children").and_then(|v| v.as_array()) else {
        return;
    };

    for child in children {
        match child.get("type").and_then(|v| v.as_str()) {
            Some("folder") => {
                let title = json_name(child);
                let mut folder = BookmarkNode {
                    title: title.clone(),
                    url: String::new(),
                    created_at: json_timestamp(child, "date_added"),
                    modified_at: json_timestamp(child, "date_modified"),
                    folder_path: path.to_vec(),
                    children: Vec::new(),
                };
                // Paths diverge per branch, so every child gets its own copy.
                let mut child_path = path.to_vec();
                child_path.push(title);
                walk_children(child, &mut folder, &child_path);
                parent.children.push(folder);
            }
            Some("url") => {
                parent.children.push(BookmarkNode {
                    title: json_name(child),
                    url: child
                        .get("url")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                    created_at: json_timestamp(child, "date_added"),
                    modified_at: json_timestamp(child, "date_modified"),
                    folder_path: path.to_vec(),
                    children: Vec::new(),
                });
            }
            // Unknown or missing discriminator: tolerated, entry dropped.
            _ => {}
        }
    }
}

const NETSCAPE_HEADER: &str = "<!DOCTYPE NETSCAPE-Bookmark-file-1>\n\
<!-- This is an automatically generated file.\n\
     It will be read and overwritten.\n\
     DO NOT EDIT! -->\n\
<META HTTP-EQUIV=\"Content-Type\" CONTENT=\"text/html; charset=UTF-8\">\n\
<TITLE>Bookmarks</TITLE>\n\
<H1>Bookmarks</H1>\n\
<DL><p>\n";

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Serialize trees to the Netscape exchange document.
///
/// Folders are written before their children, source order is preserved,
/// and `ADD_DATE`/`LAST_MODIFIED` carry Unix seconds. Deterministic for a
/// given input.
pub fn to_netscape_html(nodes: &[BookmarkNode]) -> String {
    let mut out = String::from(NETSCAPE_HEADER);
    for node in nodes {
        write_node(&mut out, node, 1);
    }
    out.push_str("</DL><p>\n");
    out
}

fn write_node(out: &mut String, node: &BookmarkNode, indent_level: usize) {
    let indent = "    ".repeat(indent_level);
    let added = timestamp::to_unix_secs(node.created_at);

    if node.is_folder() {
        let modified = timestamp::to_unix_secs(node.modified_at);
        out.push_str(&format!(
            "{}<DT><H3 ADD_DATE=\"{}\" LAST_MODIFIED=\"{}\">{}</H3>\n",
            indent,
            added,
            modified,
            escape_html(&node.title)
        ));
        out.push_str(&format!("{}<DL><p>\n", indent));
        for child in &node.children {
            write_node(out, child, indent_level + 1);
        }
        out.push_str(&format!("{}</DL><p>\n", indent));
    } else {
        out.push_str(&format!(
            "{}<DT><A HREF=\"{}\" ADD_DATE=\"{}\">{}</A>\n",
            indent,
            escape_html(&node.url),
            added,
            escape_html(&node.title)
        ));
    }
}

/// Parse a Netscape exchange document back into bookmark trees.
///
/// Walks the parsed DOM with open/close events, tracking `<DL>` nesting to
/// rebuild folder paths; this stays correct however the HTML parser chooses
/// to nest the loosely-structured `<DT>` elements.
pub fn parse_netscape_html(html: &str) -> Result<Vec<BookmarkNode>> {
    let document = Html::parse_document(html);

    let mut roots: Vec<BookmarkNode> = Vec::new();
    // One frame per open <DL>; `None` for container DLs that are not a
    // folder (the outermost list).
    let mut open: Vec<Option<BookmarkNode>> = Vec::new();
    let mut path: Vec<String> = Vec::new();
    // Folder header seen, waiting for its <DL>.
    let mut pending_folder: Option<BookmarkNode> = None;

    let mut in_h3 = false;
    let mut in_a = false;
    let mut text = String::new();
    let mut attrs = (0i64, 0i64);
    let mut href = String::new();

    fn attach(
        node: BookmarkNode,
        open: &mut [Option<BookmarkNode>],
        roots: &mut Vec<BookmarkNode>,
    ) {
        match open.iter_mut().rev().find_map(|f| f.as_mut()) {
            Some(folder) => folder.children.push(node),
            None => roots.push(node),
        }
    }

    for edge in document.tree.root().traverse() {
        match edge {
            Edge::Open(node) => {
                if let Some(el) = node.value().as_element() {
                    match el.name() {
                        "dl" => {
                            if let Some(folder) = pending_folder.take() {
                                path.push(folder.title.clone());
                                open.push(Some(folder));
                            } else {
                                open.push(None);
                            }
                        }
                        "h3" => {
                            in_h3 = true;
                            text.clear();
                            attrs = (
                                attr_i64(el, "add_date"),
                                attr_i64(el, "last_modified"),
                            );
                        }
                        "a" => {
                            in_a = true;
                            text.clear();
                            href = el.attr("href").unwrap_or("").to_string();
                            attrs = (attr_i64(el, "add_date"), 0);
                        }
                        _ => {}
                    }
                } else if let Some(t) = node.value().as_text() {
                    if in_h3 || in_a {
                        text.push_str(t);
                    }
                }
            }
            Edge::Close(node) => {
                let Some(el) = node.value().as_element() else {
                    continue;
                };
                match el.name() {
                    "dl" => {
                        if let Some(frame) = open.pop() {
                            if let Some(folder) = frame {
                                path.pop();
                                attach(folder, &mut open, &mut roots);
                            }
                        }
                    }
                    "h3" => {
                        in_h3 = false;
                        pending_folder = Some(BookmarkNode {
                            title: std::mem::take(&mut text),
                            url: String::new(),
                            created_at: timestamp::from_unix_secs(attrs.0),
                            modified_at: timestamp::from_unix_secs(attrs.1),
                            folder_path: path.clone(),
                            children: Vec::new(),
                        });
                    }
                    "a" => {
                        in_a = false;
                        let leaf = BookmarkNode {
                            title: std::mem::take(&mut text),
                            url: std::mem::take(&mut href),
                            created_at: timestamp::from_unix_secs(attrs.0),
                            modified_at: 0,
                            folder_path: path.clone(),
                            children: Vec::new(),
                        };
                        attach(leaf, &mut open, &mut roots);
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(roots)
}

fn attr_i64(el: &scraper::node::Element, name: &str) -> i64 {
    el.attr(name).and_then(|v| v.parse().ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn chrome_doc() -> Value {
        json!({
            "checksum": "ignored",
            "roots": {
                "bookmark_bar": {
                    "children": [
                        {
                            "type": "folder",
                            "name": "Work",
                            "date_added": "13000000000000000",
                            "children": [
                                {
                                    "type": "url",
                                    "name": "Tracker",
                                    "url": "https://tracker.test/board",
                                    "date_added": "13000000001000000"
                                },
                                {
                                    "type": "folder",
                                    "name": "Docs",
                                    "children": [
                                        {
                                            "type": "url",
                                            "name": "Wiki",
                                            "url": "https://wiki.test/"
                                        }
                                    ]
                                }
                            ]
                        },
                        {
                            "type": "url",
                            "name": "News",
                            "url": "https://news.test/"
                        }
                    ],
                    "name": "Bookmarks bar"
                },
                "other": { "children": [], "name": "Other bookmarks" },
                "sync_transaction_version": "42"
            }
        })
    }

    #[test]
    fn parses_nested_folders_with_paths() {
        let trees = parse_bookmark_tree(&chrome_doc()).unwrap();
        assert_eq!(trees.len(), 2, "metadata-only root must be skipped");

        let bar = &trees[0];
        assert!(bar.is_folder());
        assert_eq!(bar.title, "Bookmarks bar");
        assert_eq!(bar.children.len(), 2);

        let work = &bar.children[0];
        assert!(work.is_folder());
        assert_eq!(work.folder_path, ["Bookmarks bar"]);
        assert_eq!(work.created_at, 13_000_000_000_000_000);

        let tracker = &work.children[0];
        assert_eq!(tracker.url, "https://tracker.test/board");
        assert_eq!(tracker.folder_path, ["Bookmarks bar", "Work"]);

        let wiki = &work.children[1].children[0];
        assert_eq!(wiki.folder_path, ["Bookmarks bar", "Work", "Docs"]);
    }

    #[test]
    fn missing_roots_is_a_hard_error() {
        assert!(parse_bookmark_tree(&json!({ "version": 1 })).is_err());
    }

    #[test]
    fn malformed_entries_default_rather_than_fail() {
        let doc = json!({
            "roots": {
                "bookmark_bar": {
                    "children": [
                        { "type": "url" },
                        { "name": "no type, dropped" }
                    ]
                }
            }
        });
        let trees = parse_bookmark_tree(&doc).unwrap();
        let bar = &trees[0];
        assert_eq!(bar.children.len(), 1);
        assert_eq!(bar.children[0].title, "");
        assert_eq!(bar.children[0].url, "");
        assert_eq!(bar.children[0].created_at, 0);
    }

    #[test]
    fn serializer_is_deterministic_and_ordered() {
        let trees = parse_bookmark_tree(&chrome_doc()).unwrap();
        let html = to_netscape_html(&trees);

        assert_eq!(html, to_netscape_html(&trees));
        assert!(html.starts_with("<!DOCTYPE NETSCAPE-Bookmark-file-1>"));
        // Folder header precedes its children.
        let folder_pos = html.find("Work").unwrap();
        let leaf_pos = html.find("Tracker").unwrap();
        assert!(folder_pos < leaf_pos);
    }

    #[test]
    fn add_date_is_converted_to_unix_seconds() {
        let trees = parse_bookmark_tree(&chrome_doc()).unwrap();
        let html = to_netscape_html(&trees);
        // 13_000_000_000_000_000 µs → 1_355_526_400 s.
        assert!(html.contains("ADD_DATE=\"1355526400\""));
    }

    #[test]
    fn round_trip_preserves_titles_urls_and_paths() {
        let trees = parse_bookmark_tree(&chrome_doc()).unwrap();
        let reparsed = parse_netscape_html(&to_netscape_html(&trees)).unwrap();

        let before = flatten(&trees);
        let after = flatten(&reparsed);
        assert_eq!(before, after);
    }

    #[test]
    fn round_trip_survives_characters_needing_escapes() {
        let node = BookmarkNode {
            title: "A & B <\"quoted\">".to_string(),
            url: "https://a.test/?q=1&r=2".to_string(),
            created_at: 13_000_000_000_000_000,
            modified_at: 0,
            folder_path: vec![],
            children: vec![],
        };
        let reparsed = parse_netscape_html(&to_netscape_html(&[node.clone()])).unwrap();
        assert_eq!(reparsed.len(), 1);
        assert_eq!(reparsed[0].title, node.title);
        assert_eq!(reparsed[0].url, node.url);
    }

    // Strategy for a small bookmark forest with folders and leaves.
    fn arb_forest() -> impl Strategy<Value = Vec<BookmarkNode>> {
        let title = "[a-zA-Z0-9&<>']{1,8}";
        let url = "[a-z]{1,8}".prop_map(|h| format!("https://{}.test/", h));

        let leaf = (title, url).prop_map(|(t, u)| BookmarkNode {
            title: t,
            url: u,
            created_at: 13_000_000_000_000_000,
            modified_at: 0,
            folder_path: vec![],
            children: vec![],
        });

        let node = leaf.prop_recursive(3, 12, 4, move |inner| {
            ("[a-zA-Z0-9]{1,8}", prop::collection::vec(inner, 0..4)).prop_map(|(t, children)| {
                BookmarkNode {
                    title: t,
                    url: String::new(),
                    created_at: 13_000_000_000_000_000,
                    modified_at: 13_000_000_000_000_000,
                    folder_path: vec![],
                    children,
                }
            })
        });

        prop::collection::vec(node, 1..4).prop_map(|mut roots| {
            // Roots must be folders; rewrite paths so the fixture is
            // internally consistent before comparing round-trip output.
            for root in &mut roots {
                root.url.clear();
                fix_paths(root, &[]);
            }
            roots
        })
    }

    fn fix_paths(node: &mut BookmarkNode, path: &[String]) {
        node.folder_path = path.to_vec();
        let mut child_path = path.to_vec();
        child_path.push(node.title.clone());
        for child in &mut node.children {
            fix_paths(child, &child_path);
        }
    }

    proptest! {
        #[test]
        fn round_trip_any_generated_tree(forest in arb_forest()) {
            let html = to_netscape_html(&forest);
            let reparsed = parse_netscape_html(&html).unwrap();

            let before: Vec<_> = flatten(&forest);
            let after = flatten(&reparsed);
            prop_assert_eq!(before, after);
        }
    }
}
