//! Tag-attribute document helpers.
//!
//! The fleet's interchange documents (revision pins, build options, build
//! invocations) are single elements whose attributes carry the payload.
//! Parsing goes through `roxmltree`; emission is the small writer below,
//! which always renders attributes in sorted order so serialized documents
//! are canonical.

/// Escape a string for use inside a double-quoted XML attribute.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render a self-closing element with sorted attributes.
pub fn element(tag: &str, attrs: impl IntoIterator<Item = (String, String)>) -> String {
    let mut pairs: Vec<(String, String)> = attrs.into_iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let mut out = format!("<{tag}");
    for (name, value) in pairs {
        out.push_str(&format!(" {name}=\"{}\"", escape_attr(&value)));
    }
    out.push_str(" />");
    out
}

/// Render an element with sorted attributes wrapping pre-rendered children.
pub fn element_with_children(
    tag: &str,
    attrs: impl IntoIterator<Item = (String, String)>,
    children: &[String],
) -> String {
    let mut pairs: Vec<(String, String)> = attrs.into_iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let mut out = format!("<{tag}");
    for (name, value) in pairs {
        out.push_str(&format!(" {name}=\"{}\"", escape_attr(&value)));
    }
    out.push('>');
    for child in children {
        out.push_str(child);
    }
    out.push_str(&format!("</{tag}>"));
    out
}

/// Find the element tagged `tag` in a parsed document: either the root
/// itself or any descendant (documents may embed the element of interest).
pub fn find_tagged<'a, 'input>(
    doc: &'a roxmltree::Document<'input>,
    tag: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    let root = doc.root_element();
    if root.has_tag_name(tag) {
        return Some(root);
    }
    root.descendants().find(|n| n.has_tag_name(tag))
}
