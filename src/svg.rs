use crate::error::Result;

/// Style the laser cutter interprets as a contour to cut.
pub const CUT_STYLE: &str = "fill:none;stroke:red;stroke-width:1px";

/// Style of a hole left in a stock sheet by an earlier cut.
pub const HOLE_STYLE: &str = "fill:#646464;stroke:none";

/// Element names that describe cuttable geometry.
pub const SHAPE_ELEMENTS: [&str; 6] = ["circle", "rect", "ellipse", "polygon", "polyline", "path"];

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Node::Text(_))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Parses a document and returns its root element. DTDs are allowed since
    /// illustration tools commonly emit them.
    pub fn parse(text: &str) -> Result<Self> {
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        let doc = roxmltree::Document::parse_with_options(text, options)?;
        let root = doc.root_element();

        let prefixes: Vec<(Option<String>, String)> = root
            .namespaces()
            .filter(|ns| ns.uri() != XML_NAMESPACE)
            .map(|ns| (ns.name().map(str::to_string), ns.uri().to_string()))
            .collect();

        let mut element = convert(root, &prefixes);
        let declarations = prefixes.iter().map(|(prefix, uri)| {
            let key = match prefix {
                Some(p) => format!("xmlns:{p}"),
                None => "xmlns".to_string(),
            };
            (key, uri.clone())
        });
        let mut attrs: Vec<(String, String)> = declarations.collect();
        attrs.append(&mut element.attrs);
        element.attrs = attrs;
        Ok(element)
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Sets an attribute, keeping its position if it already exists.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn attrs(&self) -> &[(String, String)] {
        &self.attrs
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }

    /// Element children, skipping text.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Copy of this element with its attributes but without any content.
    pub fn shallow_clone(&self) -> Element {
        Element {
            name: self.name.clone(),
            attrs: self.attrs.clone(),
            children: Vec::new(),
        }
    }

    pub fn is_shape(&self) -> bool {
        SHAPE_ELEMENTS.contains(&self.name.as_str())
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attrs {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            escape_into(v, true, out);
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                Node::Element(e) => e.write_xml(out),
                Node::Text(t) => escape_into(t, false, out),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

/// Restyles every shape, including those nested in groups, to the laser
/// cut style.
pub fn prepare_for_cutting(element: &mut Element) {
    if element.is_shape() {
        element.set_attr("style", CUT_STYLE);
        return;
    }
    if element.name == "g" || element.name == "svg" {
        for child in element.children_mut() {
            if let Node::Element(e) = child {
                prepare_for_cutting(e);
            }
        }
    }
}

/// Appends copies of the holes drawn on `sheet` to a packed document.
pub fn add_holes(document: &mut Element, sheet: &Element) {
    for hole in sheet.elements() {
        document.push(hole.clone());
    }
}

/// Removes every element drawn with the hole style, at any depth.
pub fn remove_holes(element: &mut Element) {
    element.children.retain(|child| match child {
        Node::Element(e) => !e.attr("style").is_some_and(|s| s.starts_with(HOLE_STYLE)),
        Node::Text(_) => true,
    });
    for child in &mut element.children {
        if let Node::Element(e) = child {
            remove_holes(e);
        }
    }
}

/// Adds the shapes of a finished cut job to `sheet` as holes.
pub fn record_cut(sheet: &mut Element, cut: &Element) {
    for shape in cut.elements() {
        let mut hole = shape.clone();
        restyle_as_hole(&mut hole);
        sheet.push(hole);
    }
}

fn restyle_as_hole(element: &mut Element) {
    if let Some(style) = element.attr("style")
        && style.contains(CUT_STYLE)
    {
        let restyled = style.replace(CUT_STYLE, HOLE_STYLE);
        element.set_attr("style", restyled);
    }
    for child in &mut element.children {
        if let Node::Element(e) = child {
            restyle_as_hole(e);
        }
    }
}

fn convert(node: roxmltree::Node<'_, '_>, prefixes: &[(Option<String>, String)]) -> Element {
    let tag = node.tag_name();
    let mut element = Element::new(qualify(tag.name(), tag.namespace(), prefixes, false));

    for attr in node.attributes() {
        let name = qualify(attr.name(), attr.namespace(), prefixes, true);
        element.attrs.push((name, attr.value().to_string()));
    }

    for child in node.children() {
        if child.is_element() {
            element.push(convert(child, prefixes));
        } else if child.is_text() {
            element
                .children
                .push(Node::Text(child.text().unwrap_or_default().to_string()));
        }
    }
    element
}

fn qualify(
    local: &str,
    namespace: Option<&str>,
    prefixes: &[(Option<String>, String)],
    is_attr: bool,
) -> String {
    let Some(uri) = namespace else {
        return local.to_string();
    };
    if uri == XML_NAMESPACE {
        return format!("xml:{local}");
    }
    // Unprefixed attributes never take the default namespace.
    if !is_attr && prefixes.iter().any(|(p, u)| p.is_none() && u == uri) {
        return local.to_string();
    }
    match prefixes.iter().find(|(p, u)| p.is_some() && u == uri) {
        Some((Some(p), _)) => format!("{p}:{local}"),
        _ => local.to_string(),
    }
}

fn escape_into(text: &str, in_attr: bool, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if in_attr => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="100" height="50">
  <g id="layer"><rect width="10" height="10" style="fill:#FF0000"/></g>
  <use xlink:href="#a"/>
</svg>"##;

    #[test]
    fn test_parse_keeps_namespaces_and_order() {
        let root = Element::parse(DOC).unwrap();
        assert_eq!(root.name, "svg");
        assert_eq!(root.attr("xmlns"), Some("http://www.w3.org/2000/svg"));
        assert_eq!(root.attr("xmlns:xlink"), Some("http://www.w3.org/1999/xlink"));
        assert_eq!(root.attr("width"), Some("100"));

        let names: Vec<&str> = root.elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["g", "use"]);
        let use_el = root.elements().nth(1).unwrap();
        assert_eq!(use_el.attr("xlink:href"), Some("#a"));
    }

    #[test]
    fn test_serialization_reparses_identically() {
        let root = Element::parse(DOC).unwrap();
        let again = Element::parse(&root.to_xml()).unwrap();
        assert_eq!(root.to_xml(), again.to_xml());
    }

    #[test]
    fn test_serialization_is_order_sensitive() {
        let a = Element::new("rect").with_attr("x", "0").with_attr("y", "0");
        let b = Element::new("rect").with_attr("y", "0").with_attr("x", "0");
        assert_ne!(a.to_xml(), b.to_xml());
        assert_eq!(a.to_xml(), r#"<rect x="0" y="0"/>"#);
    }

    #[test]
    fn test_escaping() {
        let e = Element::new("text").with_attr("data", "a\"<b>&");
        assert_eq!(e.to_xml(), r#"<text data="a&quot;&lt;b&gt;&amp;"/>"#);
    }

    #[test]
    fn test_shallow_clone_drops_children() {
        let root = Element::parse(DOC).unwrap();
        let shallow = root.shallow_clone();
        assert!(shallow.children().is_empty());
        assert_eq!(shallow.attrs(), root.attrs());
    }

    #[test]
    fn test_set_attr_keeps_position() {
        let mut e = Element::new("rect").with_attr("x", "1").with_attr("y", "2");
        e.set_attr("x", "5");
        assert_eq!(e.to_xml(), r#"<rect x="5" y="2"/>"#);
        assert!(e.has_attr("y"));
    }

    #[test]
    fn test_prepare_for_cutting_recurses_into_groups() {
        let mut root = Element::parse(DOC).unwrap();
        prepare_for_cutting(&mut root);
        let g = root.elements().next().unwrap();
        let rect = g.elements().next().unwrap();
        assert_eq!(rect.attr("style"), Some(CUT_STYLE));
    }

    #[test]
    fn test_recorded_cut_becomes_removable_holes() {
        let mut cut = Element::parse(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><g><rect width="10" height="10" style="fill:#ff0000"/></g><circle r="3" style="fill:#00ff00"/></svg>"#,
        )
        .unwrap();
        prepare_for_cutting(&mut cut);

        let mut sheet = Element::parse(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100"/>"#,
        )
        .unwrap();
        record_cut(&mut sheet, &cut);
        assert_eq!(sheet.elements().count(), 2);
        let nested = sheet.elements().next().unwrap().elements().next().unwrap();
        assert_eq!(nested.attr("style"), Some(HOLE_STYLE));
        assert!(!sheet.to_xml().contains(CUT_STYLE));

        let mut packed = Element::parse(
            r#"<svg xmlns="http://www.w3.org/2000/svg"><rect width="5" height="5" style="fill:#0000ff;stroke:none"/></svg>"#,
        )
        .unwrap();
        let before = packed.to_xml();
        add_holes(&mut packed, &sheet);
        assert_eq!(packed.elements().count(), 3);

        remove_holes(&mut packed);
        // The group survives; only hole-styled elements go.
        let names: Vec<&str> = packed.elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["rect", "g"]);
        assert_eq!(packed.elements().nth(1).unwrap().elements().count(), 0);
        assert_ne!(packed.to_xml(), before);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Element::parse("<svg><rect></svg>").is_err());
    }
}
