//! Schema (C2) — parses a plugin's schema XML into a tree of typed
//! directories/keys, validates values against it, and resolves a path to
//! a schema node.

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{ProvmanError, ProvmanResult};
use crate::path;

/// A schema key's declared value type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueType {
    String,
    Int,
    /// Unordered set of the allowed string values.
    Enum(Vec<String>),
}

/// A single node in a plugin's schema tree.
#[derive(Debug, Clone)]
pub enum SchemaNode {
    Dir {
        name: String,
        can_delete: bool,
        /// Child names in the order they appeared in the schema XML.
        order: Vec<String>,
        children: HashMap<String, SchemaNode>,
    },
    Key {
        name: String,
        can_delete: bool,
        can_write: bool,
        value_type: ValueType,
    },
}

impl SchemaNode {
    pub fn name(&self) -> &str {
        match self {
            SchemaNode::Dir { name, .. } => name,
            SchemaNode::Key { name, .. } => name,
        }
    }

    pub fn can_delete(&self) -> bool {
        match self {
            SchemaNode::Dir { can_delete, .. } => *can_delete,
            SchemaNode::Key { can_delete, .. } => *can_delete,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, SchemaNode::Dir { .. })
    }

    /// `describe`: "dir" | "int" | "string" | "enum: v1, v2, …" (spec §4.2).
    /// The enum list has no guaranteed order.
    pub fn describe(&self) -> String {
        match self {
            SchemaNode::Dir { .. } => "dir".to_string(),
            SchemaNode::Key { value_type, .. } => match value_type {
                ValueType::String => "string".to_string(),
                ValueType::Int => "int".to_string(),
                ValueType::Enum(values) => format!("enum: {}", values.join(", ")),
            },
        }
    }

    /// Child names in schema-document order, for a `Dir` node; `None` for
    /// a `Key` (used to order `Get` on an interior node).
    pub fn dir_order(&self) -> Option<&[String]> {
        match self {
            SchemaNode::Dir { order, .. } => Some(order),
            SchemaNode::Key { .. } => None,
        }
    }
}

/// An open `<schema>`/`<dir>` frame while parsing, tracking children both
/// by name (for lookup/duplicate checks) and in document order.
struct Frame {
    name: String,
    can_delete: bool,
    order: Vec<String>,
    children: HashMap<String, SchemaNode>,
}

impl Frame {
    fn new(name: String, can_delete: bool) -> Self {
        Self { name, can_delete, order: Vec::new(), children: HashMap::new() }
    }
}

/// A parsed schema tree for one plugin, anchored at `root`.
#[derive(Debug, Clone)]
pub struct Schema {
    /// Path ending in `/`, not `/` itself (spec §3 invariant).
    pub root: String,
    tree: SchemaNode,
}

impl Schema {
    /// Parses a `<schema root="…/">` document per the DTD in spec §6.
    ///
    /// The `<schema>` element itself is treated as an implicit unnamed
    /// root directory so the same sibling-uniqueness bookkeeping
    /// (`insert_child`) covers its direct children too.
    pub fn parse(xml: &str) -> ProvmanResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut root_attr: Option<String> = None;
        let mut stack: Vec<Frame> = Vec::new();
        let mut buf = Vec::new();
        let mut finished: Option<SchemaNode> = None;

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| ProvmanError::Corrupt(format!("schema XML parse error: {e}")))?;
            match event {
                Event::Eof => break,
                Event::Start(e) => {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    let attrs = parse_attrs(&e)?;
                    match tag.as_str() {
                        "schema" => {
                            let root = attrs.get("root").cloned().ok_or_else(|| {
                                ProvmanError::Corrupt("schema missing root attribute".into())
                            })?;
                            if root == "/" || !root.ends_with('/') {
                                return Err(ProvmanError::Corrupt(format!(
                                    "invalid schema root: {root:?}"
                                )));
                            }
                            root_attr = Some(root);
                            stack.push(Frame::new(String::new(), true));
                        }
                        "dir" => push_dir(&mut stack, &attrs)?,
                        "key" => insert_key(&mut stack, &attrs)?,
                        other => {
                            return Err(ProvmanError::Corrupt(format!(
                                "unknown schema tag: {other:?}"
                            )))
                        }
                    }
                }
                Event::Empty(e) => {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    let attrs = parse_attrs(&e)?;
                    match tag.as_str() {
                        "dir" => {
                            push_dir(&mut stack, &attrs)?;
                            pop_dir(&mut stack)?;
                        }
                        "key" => insert_key(&mut stack, &attrs)?,
                        other => {
                            return Err(ProvmanError::Corrupt(format!(
                                "unknown schema tag: {other:?}"
                            )))
                        }
                    }
                }
                Event::End(e) => {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    match tag.as_str() {
                        "dir" => pop_dir(&mut stack)?,
                        "schema" => {
                            let frame = stack.pop().ok_or_else(|| {
                                ProvmanError::Corrupt("unbalanced </schema> tag".to_string())
                            })?;
                            finished = Some(SchemaNode::Dir {
                                name: frame.name,
                                can_delete: frame.can_delete,
                                order: frame.order,
                                children: frame.children,
                            });
                        }
                        "key" => {} // <key> never has children; nothing to pop.
                        _ => {}
                    }
                }
                _ => {}
            }
            buf.clear();
        }

        let root = root_attr
            .ok_or_else(|| ProvmanError::Corrupt("missing <schema> root element".to_string()))?;
        if !stack.is_empty() {
            return Err(ProvmanError::Corrupt("unbalanced schema tags".to_string()));
        }
        let tree = finished
            .ok_or_else(|| ProvmanError::Corrupt("unbalanced schema tags".to_string()))?;

        Ok(Schema { root, tree })
    }

    /// `locate`: strips the schema root off `path`, then walks remaining
    /// segments, matching an unnamed ("") child as a wildcard when no
    /// named child matches.
    pub fn locate(&self, path: &str) -> ProvmanResult<&SchemaNode> {
        let root_norm = path::normalize(&self.root);
        let path_norm = path::normalize(path);
        let rest = if path_norm == root_norm {
            ""
        } else if let Some(stripped) = path_norm.strip_prefix(root_norm) {
            stripped
                .strip_prefix('/')
                .ok_or_else(|| ProvmanError::NotFound(format!("path outside schema: {path:?}")))?
        } else {
            return Err(ProvmanError::NotFound(format!(
                "path outside schema root {:?}: {path:?}",
                self.root
            )));
        };

        let mut node = &self.tree;
        if rest.is_empty() {
            return Ok(node);
        }
        for segment in rest.split('/') {
            match node {
                SchemaNode::Dir { children, .. } => {
                    node = children
                        .get(segment)
                        .or_else(|| children.get(""))
                        .ok_or_else(|| {
                            ProvmanError::NotFound(format!("no schema node for {path:?}"))
                        })?;
                }
                SchemaNode::Key { .. } => {
                    return Err(ProvmanError::NotFound(format!(
                        "path continues past a key: {path:?}"
                    )))
                }
            }
        }
        Ok(node)
    }

    /// `check`: validates a value against a resolved key node.
    pub fn check(node: &SchemaNode, value: &str) -> ProvmanResult<()> {
        match node {
            SchemaNode::Dir { .. } => {
                Err(ProvmanError::BadKey("cannot set a directory".to_string()))
            }
            SchemaNode::Key {
                can_write,
                value_type,
                ..
            } => {
                if !can_write {
                    return Err(ProvmanError::BadKey("key is not writable".to_string()));
                }
                match value_type {
                    ValueType::String => Ok(()),
                    ValueType::Int => {
                        if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                            Ok(())
                        } else {
                            Err(ProvmanError::BadArgs(format!(
                                "not an unsigned integer: {value:?}"
                            )))
                        }
                    }
                    ValueType::Enum(values) => {
                        if values.iter().any(|v| v == value) {
                            Ok(())
                        } else {
                            Err(ProvmanError::BadArgs(format!(
                                "{value:?} is not one of {values:?}"
                            )))
                        }
                    }
                }
            }
        }
    }
}

fn parse_attrs(e: &quick_xml::events::BytesStart) -> ProvmanResult<HashMap<String, String>> {
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| ProvmanError::Corrupt(format!("bad attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| ProvmanError::Corrupt(format!("bad attribute value: {e}")))?
            .to_string();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn bool_attr(
    attrs: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> ProvmanResult<bool> {
    match attrs.get(key).map(|s| s.as_str()) {
        None => Ok(default),
        Some("yes") => Ok(true),
        Some("no") => Ok(false),
        Some(other) => Err(ProvmanError::Corrupt(format!(
            "{key} must be yes|no, got {other:?}"
        ))),
    }
}

/// Inserts `node` as a child of the innermost open `<dir>` on the stack,
/// enforcing the sibling-uniqueness and unnamed-only-child invariants. If
/// the stack is empty, `node` belongs directly under the schema root.
fn insert_child(stack: &mut [Frame], name: String, node: SchemaNode) -> ProvmanResult<()> {
    let frame = if let Some(top) = stack.last_mut() {
        top
    } else {
        return Err(ProvmanError::Corrupt(
            "schema element outside <schema> root".to_string(),
        ));
    };
    if frame.children.contains_key(&name) {
        return Err(ProvmanError::Corrupt(format!("duplicate sibling: {name:?}")));
    }
    if name.is_empty() && !frame.children.is_empty() {
        return Err(ProvmanError::Corrupt(
            "unnamed directory must be its parent's only child".to_string(),
        ));
    }
    if !name.is_empty() && frame.children.contains_key("") {
        return Err(ProvmanError::Corrupt(
            "unnamed directory must be its parent's only child".to_string(),
        ));
    }
    frame.order.push(name.clone());
    frame.children.insert(name, node);
    Ok(())
}

fn push_dir(stack: &mut Vec<Frame>, attrs: &HashMap<String, String>) -> ProvmanResult<()> {
    if stack.is_empty() {
        return Err(ProvmanError::Corrupt(
            "<dir> outside <schema> root".to_string(),
        ));
    }
    let name = attrs.get("name").cloned().unwrap_or_default();
    let can_delete = bool_attr(attrs, "delete", true)?;
    stack.push(Frame::new(name, can_delete));
    Ok(())
}

fn pop_dir(stack: &mut Vec<Frame>) -> ProvmanResult<()> {
    let frame = stack
        .pop()
        .ok_or_else(|| ProvmanError::Corrupt("unbalanced </dir> tag".to_string()))?;
    let name = frame.name.clone();
    let node = SchemaNode::Dir {
        name: frame.name,
        can_delete: frame.can_delete,
        order: frame.order,
        children: frame.children,
    };
    insert_child(stack, name, node)
}

fn insert_key(stack: &mut [Frame], attrs: &HashMap<String, String>) -> ProvmanResult<()> {
    let name = attrs
        .get("name")
        .cloned()
        .ok_or_else(|| ProvmanError::Corrupt("key missing name attribute".to_string()))?;
    let type_str = attrs
        .get("type")
        .cloned()
        .ok_or_else(|| ProvmanError::Corrupt(format!("key {name:?} missing type")))?;
    let can_delete = bool_attr(attrs, "delete", false)?;
    let can_write = bool_attr(attrs, "write", true)?;
    let value_type = match type_str.as_str() {
        "string" => ValueType::String,
        "int" => ValueType::Int,
        "enum" => {
            let values = attrs
                .get("values")
                .ok_or_else(|| ProvmanError::Corrupt(format!("enum key {name:?} missing values")))?;
            ValueType::Enum(values.split(',').map(|v| v.trim().to_string()).collect())
        }
        other => {
            return Err(ProvmanError::Corrupt(format!(
                "unknown key type: {other:?}"
            )))
        }
    };
    let node = SchemaNode::Key {
        name: name.clone(),
        can_delete,
        can_write,
        value_type,
    };
    insert_child(stack, name, node)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TELEPHONY_SCHEMA: &str = r#"
        <schema root="/telephony/">
            <dir name="contexts">
                <dir name="">
                    <key name="apn" type="string"/>
                    <key name="name" type="string"/>
                    <key name="port" type="int"/>
                    <key name="kind" type="enum" values="gprs, internet, mms"/>
                    <key name="readonly" type="string" write="no"/>
                </dir>
            </dir>
        </schema>
    "#;

    #[test]
    fn parses_root_and_wildcard() {
        let schema = Schema::parse(TELEPHONY_SCHEMA).unwrap();
        assert_eq!(schema.root, "/telephony/");
        let node = schema.locate("/telephony/contexts/acct/apn").unwrap();
        assert_eq!(node.describe(), "string");
    }

    #[test]
    fn check_rejects_bad_int_and_enum() {
        let schema = Schema::parse(TELEPHONY_SCHEMA).unwrap();
        let port = schema.locate("/telephony/contexts/acct/port").unwrap();
        assert!(Schema::check(port, "abc").is_err());
        assert!(Schema::check(port, "8080").is_ok());

        let kind = schema.locate("/telephony/contexts/acct/kind").unwrap();
        assert!(Schema::check(kind, "bogus").is_err());
        assert!(Schema::check(kind, "gprs").is_ok());
    }

    #[test]
    fn check_rejects_write_forbidden_and_directories() {
        let schema = Schema::parse(TELEPHONY_SCHEMA).unwrap();
        let readonly = schema.locate("/telephony/contexts/acct/readonly").unwrap();
        assert!(matches!(
            Schema::check(readonly, "x"),
            Err(ProvmanError::BadKey(_))
        ));

        let dir = schema.locate("/telephony/contexts/acct").unwrap();
        assert!(matches!(Schema::check(dir, "x"), Err(ProvmanError::BadKey(_))));
    }

    #[test]
    fn dir_order_matches_document_order() {
        let schema = Schema::parse(TELEPHONY_SCHEMA).unwrap();
        let node = schema.locate("/telephony/contexts/acct").unwrap();
        assert_eq!(
            node.dir_order().unwrap(),
            &["apn".to_string(), "name".to_string(), "port".to_string(), "kind".to_string(), "readonly".to_string()]
        );
    }

    #[test]
    fn rejects_duplicate_sibling() {
        let xml = r#"<schema root="/a/"><key name="x" type="string"/><key name="x" type="int"/></schema>"#;
        assert!(Schema::parse(xml).is_err());
    }

    #[test]
    fn rejects_unnamed_dir_with_siblings() {
        let xml = r#"<schema root="/a/"><dir name=""><key name="x" type="string"/></dir><key name="y" type="string"/></schema>"#;
        assert!(Schema::parse(xml).is_err());
    }

    #[test]
    fn rejects_bad_root() {
        assert!(Schema::parse(r#"<schema root="/"></schema>"#).is_err());
        assert!(Schema::parse(r#"<schema root="/a"></schema>"#).is_err());
    }

    #[test]
    fn enum_values_trim_whitespace() {
        let xml = r#"<schema root="/a/"><key name="k" type="enum" values=" one ,two,  three "/></schema>"#;
        let schema = Schema::parse(xml).unwrap();
        let node = schema.locate("/a/k").unwrap();
        match node {
            SchemaNode::Key { value_type: ValueType::Enum(v), .. } => {
                assert_eq!(v, &vec!["one".to_string(), "two".to_string(), "three".to_string()]);
            }
            _ => panic!("expected enum key"),
        }
    }
}
