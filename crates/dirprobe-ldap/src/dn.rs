//! Distinguished Name utilities for directory entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

use dirprobe_core::Error as CoreError;

/// Errors that can occur when parsing or manipulating distinguished names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistinguishedNameError {
    /// The distinguished name was empty.
    #[error("distinguished name cannot be empty")]
    Empty,
    /// A component in the distinguished name was invalid.
    #[error("invalid distinguished name component: {0}")]
    InvalidComponent(String),
    /// A component was missing the attribute name to the left of the `=`.
    #[error("distinguished name component missing attribute: {0}")]
    MissingAttribute(String),
    /// A component was missing the value to the right of the `=`.
    #[error("distinguished name component missing value for attribute {0}")]
    MissingValue(String),
    /// The distinguished name ended with an escape character.
    #[error("distinguished name contains an unterminated escape sequence")]
    UnterminatedEscape,
    /// Multi-valued RDNs (`cn=a+uid=b`) are not used by the supported schema.
    #[error("multi-valued relative distinguished name not supported: {0}")]
    MultiValued(String),
    /// The operation needs a parent but the DN has a single component.
    #[error("distinguished name `{0}` has no parent")]
    NoParent(String),
}

impl From<DistinguishedNameError> for CoreError {
    fn from(err: DistinguishedNameError) -> Self {
        CoreError::Path(err.to_string())
    }
}

/// Structural role of an RDN's attribute type when materialising a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    /// `CN=`: generic container (or a leaf user/group).
    Container,
    /// `OU=`: organizational unit.
    OrganizationalUnit,
    /// `DC=`: domain component, assumed to exist.
    DomainComponent,
    /// Any other attribute type.
    Other,
}

/// Relative distinguished name (single attribute/value pair).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelativeDistinguishedName {
    attribute: String,
    value: String,
}

impl RelativeDistinguishedName {
    /// Create a new relative distinguished name.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Attribute portion of the RDN (e.g. `CN`).
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Unescaped attribute value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if this RDN matches the provided attribute name (case-insensitive).
    #[must_use]
    pub fn matches_attribute(&self, attribute: &str) -> bool {
        self.attribute.eq_ignore_ascii_case(attribute)
    }

    /// Classifies the attribute type.
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        if self.matches_attribute("cn") {
            ComponentKind::Container
        } else if self.matches_attribute("ou") {
            ComponentKind::OrganizationalUnit
        } else if self.matches_attribute("dc") {
            ComponentKind::DomainComponent
        } else {
            ComponentKind::Other
        }
    }

    fn normalized(&self) -> (String, String) {
        (
            self.attribute.to_ascii_lowercase(),
            self.value.to_lowercase(),
        )
    }
}

impl PartialEq for RelativeDistinguishedName {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for RelativeDistinguishedName {}

impl fmt::Display for RelativeDistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attribute, escape(&self.value))
    }
}

/// Strongly-typed distinguished name wrapper.
///
/// Components are stored most-specific first. The string form preserves the caller's
/// spelling (re-escaped), while equality and hashing are case-insensitive, matching how
/// directory servers compare names. Values are never mutated in place: moving or
/// renaming yields a new value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DistinguishedName {
    raw: String,
    components: Vec<RelativeDistinguishedName>,
}

impl DistinguishedName {
    /// Parses a distinguished name from a string.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError`] if the distinguished name is empty or contains invalid
    /// syntax.
    pub fn parse(input: impl AsRef<str>) -> std::result::Result<Self, DistinguishedNameError> {
        let raw = input.as_ref().trim();
        if raw.is_empty() {
            return Err(DistinguishedNameError::Empty);
        }

        let mut components = Vec::new();
        for component in split_escaped(raw, ',')? {
            if split_escaped(&component, '+')?.len() > 1 {
                return Err(DistinguishedNameError::MultiValued(component));
            }
            let (attribute, value) = split_attribute_value(&component)?;
            components.push(RelativeDistinguishedName::new(attribute, value));
        }

        Ok(Self::from_components(components))
    }

    fn from_components(components: Vec<RelativeDistinguishedName>) -> Self {
        Self {
            raw: render(&components),
            components,
        }
    }

    /// Borrows the canonical distinguished name string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the components, most specific first.
    #[must_use]
    pub fn components(&self) -> &[RelativeDistinguishedName] {
        &self.components
    }

    /// Number of components.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// The most specific component (the entry's own relative name).
    #[must_use]
    pub fn leaf(&self) -> &RelativeDistinguishedName {
        // Parsing guarantees at least one component.
        &self.components[0]
    }

    /// Parent DN formed by dropping the first component, or `None` for a single-component DN.
    #[must_use]
    pub fn parent(&self) -> Option<DistinguishedName> {
        (self.components.len() > 1).then(|| Self::from_components(self.components[1..].to_vec()))
    }

    /// Like [`Self::parent`], but reports a missing parent as an error.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError::NoParent`] for single-component DNs.
    pub fn require_parent(&self) -> std::result::Result<DistinguishedName, DistinguishedNameError> {
        self.parent()
            .ok_or_else(|| DistinguishedNameError::NoParent(self.raw.clone()))
    }

    /// Returns the DN chain from the root-most component down to `self`, inclusive.
    ///
    /// For `CN=a,OU=b,DC=corp` this yields `DC=corp`, `OU=b,DC=corp`, `CN=a,OU=b,DC=corp`.
    #[must_use]
    pub fn ancestry(&self) -> Vec<DistinguishedName> {
        (0..self.components.len())
            .rev()
            .map(|start| Self::from_components(self.components[start..].to_vec()))
            .collect()
    }

    /// Looks up the value for the first attribute that matches `attribute` (case-insensitive).
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.components
            .iter()
            .find(|rdn| rdn.matches_attribute(attribute))
            .map(RelativeDistinguishedName::value)
    }

    /// Returns true if the distinguished name contains a matching attribute/value pair.
    #[must_use]
    pub fn contains(&self, attribute: &str, value: &str) -> bool {
        self.components
            .iter()
            .any(|rdn| rdn.matches_attribute(attribute) && rdn.value.eq_ignore_ascii_case(value))
    }

    /// DNS domain formed from the `DC=` components (`DC=corp,DC=example` → `corp.example`).
    #[must_use]
    pub fn domain_name(&self) -> Option<String> {
        let labels = self
            .components
            .iter()
            .filter(|rdn| rdn.kind() == ComponentKind::DomainComponent)
            .map(|rdn| rdn.value.to_ascii_lowercase())
            .collect::<Vec<_>>();
        (!labels.is_empty()).then(|| labels.join("."))
    }

    /// Returns true if `self` sits strictly below `ancestor`.
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &DistinguishedName) -> bool {
        self.components.len() > ancestor.components.len()
            && self.components[self.components.len() - ancestor.components.len()..]
                == ancestor.components[..]
    }

    /// Creates a new distinguished name by prefixing the provided RDN.
    #[must_use]
    pub fn child(&self, rdn: RelativeDistinguishedName) -> Self {
        let mut components = Vec::with_capacity(self.components.len() + 1);
        components.push(rdn);
        components.extend(self.components.iter().cloned());
        Self::from_components(components)
    }
}

impl PartialEq for DistinguishedName {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Eq for DistinguishedName {}

impl Hash for DistinguishedName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for rdn in &self.components {
            rdn.normalized().hash(state);
        }
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for DistinguishedName {
    type Err = DistinguishedNameError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<DistinguishedName> for String {
    fn from(value: DistinguishedName) -> Self {
        value.raw
    }
}

impl TryFrom<String> for DistinguishedName {
    type Error = DistinguishedNameError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for DistinguishedName {
    type Error = DistinguishedNameError;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        Self::parse(value)
    }
}

// Splits on unescaped `delimiter`; escape sequences are kept intact for `unescape`.
fn split_escaped(
    input: &str,
    delimiter: char,
) -> std::result::Result<Vec<String>, DistinguishedNameError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escape = false;

    for ch in input.chars() {
        if escape {
            current.push(ch);
            escape = false;
            continue;
        }

        if ch == '\\' {
            current.push(ch);
            escape = true;
            continue;
        }

        if ch == delimiter {
            parts.push(current.trim().to_string());
            current.clear();
            continue;
        }

        current.push(ch);
    }

    if escape {
        return Err(DistinguishedNameError::UnterminatedEscape);
    }

    parts.push(current.trim().to_string());
    if parts.iter().any(String::is_empty) {
        return Err(DistinguishedNameError::InvalidComponent(input.to_string()));
    }
    Ok(parts)
}

fn split_attribute_value(
    component: &str,
) -> std::result::Result<(String, String), DistinguishedNameError> {
    let idx = component
        .find('=')
        .ok_or_else(|| DistinguishedNameError::InvalidComponent(component.to_string()))?;
    let attribute = component[..idx].trim();
    let value_part = component[idx + 1..].trim();

    if attribute.is_empty() {
        return Err(DistinguishedNameError::MissingAttribute(
            component.to_string(),
        ));
    }
    if attribute.contains('\\') {
        return Err(DistinguishedNameError::InvalidComponent(
            component.to_string(),
        ));
    }

    if value_part.is_empty() {
        return Err(DistinguishedNameError::MissingValue(attribute.to_string()));
    }

    Ok((attribute.to_string(), unescape(value_part)?))
}

// Handles both `\,` style and `\2C` hex-pair escapes.
fn unescape(value: &str) -> std::result::Result<String, DistinguishedNameError> {
    let mut bytes = Vec::with_capacity(value.len());
    let mut chars = value.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            continue;
        }

        let first = chars
            .next()
            .ok_or(DistinguishedNameError::UnterminatedEscape)?;
        let hex_pair = first
            .to_digit(16)
            .zip(chars.peek().and_then(|c| c.to_digit(16)));
        if let Some((high, low)) = hex_pair {
            chars.next();
            // Both digits are < 16, so the pair fits in a byte.
            bytes.push(u8::try_from(high * 16 + low).unwrap_or_default());
        } else {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(first.encode_utf8(&mut buf).as_bytes());
        }
    }

    String::from_utf8(bytes)
        .map_err(|_| DistinguishedNameError::InvalidComponent(value.to_string()))
}

fn escape(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = value.chars().collect();
    let mut escaped = String::with_capacity(value.len());

    for (idx, ch) in chars.iter().enumerate() {
        let is_first = idx == 0;
        let is_last = idx == chars.len() - 1;
        let needs_escape = matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
            || (is_first && (*ch == ' ' || *ch == '#'))
            || (is_last && *ch == ' ');

        if needs_escape {
            escaped.push('\\');
        }
        escaped.push(*ch);
    }

    escaped
}

fn render(components: &[RelativeDistinguishedName]) -> String {
    components
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
