//! In-memory directory used by scenario tests.
//!
//! Implements the session and connector seams over a shared map of entries with enough
//! LDAP behaviour (result codes, filters, scopes, `memberOf` back-links, ModifyDN) to
//! exercise the engine without a server.

use crate::{
    ad,
    dn::DistinguishedName,
    session::{
        DirectoryModification, EntryAttribute, LdapConnector, LdapEntry, LdapSession, ModifyOp,
        SearchScope,
    },
    Result,
};
use async_trait::async_trait;
use dirprobe_core::Error;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

const DN_VALUED: &[&str] = &["member", "memberOf", "managedBy", "distinguishedName"];

#[derive(Debug, Clone)]
struct StoredEntry {
    dn: DistinguishedName,
    attributes: Vec<(String, Vec<Vec<u8>>)>,
}

impl StoredEntry {
    fn values(&self, attribute: &str) -> Option<&Vec<Vec<u8>>> {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values)
    }

    fn values_mut(&mut self, attribute: &str) -> Option<&mut Vec<Vec<u8>>> {
        self.attributes
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values)
    }

    fn set(&mut self, attribute: &str, values: Vec<Vec<u8>>) {
        self.attributes
            .retain(|(name, _)| !name.eq_ignore_ascii_case(attribute));
        if !values.is_empty() {
            self.attributes.push((attribute.to_string(), values));
        }
    }
}

#[derive(Default)]
struct FakeState {
    entries: HashMap<DistinguishedName, StoredEntry>,
    passwords: HashMap<DistinguishedName, String>,
    failures: VecDeque<(&'static str, Error)>,
    connect_failures: VecDeque<Error>,
    naming_context: String,
    generation: u64,
    connects: usize,
    writes: usize,
}

impl FakeState {
    fn take_failure(&mut self, operation: &str) -> Option<Error> {
        let index = self
            .failures
            .iter()
            .position(|(op, _)| *op == operation)?;
        self.failures.remove(index).map(|(_, err)| err)
    }

    fn member_of(&self, dn: &DistinguishedName) -> Vec<Vec<u8>> {
        self.entries
            .values()
            .filter(|entry| {
                entry.values("member").is_some_and(|members| {
                    members
                        .iter()
                        .any(|m| parse_dn(m).is_some_and(|member| &member == dn))
                })
            })
            .map(|entry| entry.dn.as_str().as_bytes().to_vec())
            .collect()
    }

    fn materialize(&self, stored: &StoredEntry) -> LdapEntry {
        let mut entry = LdapEntry::new(stored.dn.as_str());
        let mut attributes = stored.attributes.clone();
        attributes.push((
            "distinguishedName".to_string(),
            vec![stored.dn.as_str().as_bytes().to_vec()],
        ));
        let member_of = self.member_of(&stored.dn);
        if !member_of.is_empty() {
            attributes.push(("memberOf".to_string(), member_of));
        }

        for (name, values) in attributes {
            let text = values
                .iter()
                .map(|value| String::from_utf8(value.clone()).ok())
                .collect::<Option<Vec<_>>>();
            match text {
                Some(text) => {
                    entry.attributes.insert(name, text);
                }
                None => {
                    entry.binary_attributes.insert(name, values);
                }
            }
        }
        entry
    }
}

/// Shared in-memory directory.
#[derive(Clone)]
pub(crate) struct FakeDirectory {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDirectory {
    /// Creates a directory whose naming context (and its `DC=` ancestors) already exist.
    pub(crate) fn new(naming_context: &str) -> Self {
        let base = DistinguishedName::parse(naming_context).unwrap();
        let mut state = FakeState {
            naming_context: base.to_string(),
            ..FakeState::default()
        };
        for level in base.ancestry() {
            state.entries.insert(
                level.clone(),
                StoredEntry {
                    dn: level.clone(),
                    attributes: vec![
                        text_attr("objectClass", &["top", "domain"]),
                        text_attr("dc", &[level.leaf().value()]),
                    ],
                },
            );
        }
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn connector(&self) -> Arc<dyn LdapConnector> {
        Arc::new(FakeConnector {
            directory: self.clone(),
        })
    }

    pub(crate) fn session(&self) -> FakeSession {
        FakeSession {
            generation: self.lock().generation,
            directory: self.clone(),
        }
    }

    /// Seeds an entry directly, bypassing parent checks.
    pub(crate) fn seed(&self, entry: LdapEntry) {
        let dn = DistinguishedName::parse(&entry.dn).unwrap();
        let mut attributes = entry
            .attributes
            .into_iter()
            .map(|(name, values)| {
                (
                    name,
                    values.into_iter().map(String::into_bytes).collect::<Vec<_>>(),
                )
            })
            .collect::<Vec<_>>();
        attributes.extend(entry.binary_attributes);
        self.lock()
            .entries
            .insert(dn.clone(), StoredEntry { dn, attributes });
    }

    pub(crate) fn set_password(&self, dn: &str, password: &str) {
        self.lock()
            .passwords
            .insert(DistinguishedName::parse(dn).unwrap(), password.to_string());
    }

    pub(crate) fn password(&self, dn: &str) -> Option<String> {
        self.lock()
            .passwords
            .get(&DistinguishedName::parse(dn).unwrap())
            .cloned()
    }

    /// Makes the next call of `operation` fail with `error`.
    pub(crate) fn fail_next(&self, operation: &'static str, error: Error) {
        self.lock().failures.push_back((operation, error));
    }

    /// Makes the next dial fail with `error`.
    pub(crate) fn fail_connect(&self, error: Error) {
        self.lock().connect_failures.push_back(error);
    }

    /// Invalidates every open session, as if the server dropped its sockets.
    pub(crate) fn drop_connections(&self) {
        self.lock().generation += 1;
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.lock().connects
    }

    pub(crate) fn write_count(&self) -> usize {
        self.lock().writes
    }

    pub(crate) fn entry_count(&self) -> usize {
        self.lock().entries.len()
    }

    pub(crate) fn entry(&self, dn: &str) -> Option<LdapEntry> {
        let state = self.lock();
        let dn = DistinguishedName::parse(dn).ok()?;
        state.entries.get(&dn).map(|stored| state.materialize(stored))
    }

    pub(crate) fn member_of(&self, dn: &str) -> Vec<DistinguishedName> {
        let state = self.lock();
        state
            .member_of(&DistinguishedName::parse(dn).unwrap())
            .iter()
            .filter_map(|value| parse_dn(value))
            .collect()
    }
}

struct FakeConnector {
    directory: FakeDirectory,
}

#[async_trait]
impl LdapConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn LdapSession>> {
        let mut state = self.directory.lock();
        state.connects += 1;
        if let Some(err) = state.connect_failures.pop_front() {
            return Err(err);
        }
        Ok(Box::new(FakeSession {
            generation: state.generation,
            directory: self.directory.clone(),
        }))
    }
}

pub(crate) struct FakeSession {
    directory: FakeDirectory,
    generation: u64,
}

impl FakeSession {
    fn begin(&self, operation: &'static str) -> Result<MutexGuard<'_, FakeState>> {
        let mut state = self.directory.lock();
        if state.generation != self.generation {
            return Err(Error::transient("connection closed by server"));
        }
        if let Some(err) = state.take_failure(operation) {
            return Err(err);
        }
        Ok(state)
    }
}

#[async_trait]
impl LdapSession for FakeSession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()> {
        let state = self.begin("bind")?;
        let matches = DistinguishedName::parse(dn)
            .ok()
            .and_then(|dn| state.passwords.get(&dn))
            .is_some_and(|stored| stored == password);
        if matches {
            Ok(())
        } else {
            Err(Error::from_result_code(
                49,
                "80090308: LdapErr: DSID-0C09044E, comment: AcceptSecurityContext error, data 52e",
            ))
        }
    }

    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        _attributes: &[&'static str],
    ) -> Result<Vec<LdapEntry>> {
        let state = self.begin("search")?;
        if base_dn.is_empty() {
            return Ok(vec![LdapEntry::new("")
                .with_values("supportedLDAPVersion", ["3", "2"])
                .with_values("defaultNamingContext", [state.naming_context.clone()])]);
        }

        let base = DistinguishedName::parse(base_dn)
            .map_err(|err| Error::from_result_code(34, err.to_string()))?;
        if !state.entries.contains_key(&base) {
            return Err(no_such_object(base_dn));
        }
        let filter = Filter::parse(filter)?;

        let mut found = state
            .entries
            .values()
            .filter(|stored| match scope {
                SearchScope::Base => stored.dn == base,
                SearchScope::OneLevel => stored.dn.parent().as_ref() == Some(&base),
                SearchScope::Subtree => stored.dn == base || stored.dn.is_descendant_of(&base),
            })
            .map(|stored| state.materialize(stored))
            .filter(|entry| filter.matches(entry))
            .collect::<Vec<_>>();
        found.sort_by(|a, b| a.dn.cmp(&b.dn));
        Ok(found)
    }

    async fn add(&mut self, dn: &str, attributes: &[EntryAttribute]) -> Result<()> {
        let mut state = self.begin("add")?;
        let dn = DistinguishedName::parse(dn)
            .map_err(|err| Error::from_result_code(34, err.to_string()))?;
        if state.entries.contains_key(&dn) {
            return Err(Error::from_result_code(68, "00002071: UpdErr: DSID-03050505"));
        }
        if let Some(parent) = dn.parent() {
            if !state.entries.contains_key(&parent) {
                return Err(no_such_object(parent.as_str()));
            }
        }

        let stored = StoredEntry {
            dn: dn.clone(),
            attributes: attributes
                .iter()
                .filter(|attr| !attr.name.eq_ignore_ascii_case("unicodePwd"))
                .map(|attr| (attr.name.clone(), attr.values.clone()))
                .collect(),
        };
        if let Some(encoded) = attributes
            .iter()
            .find(|attr| attr.name.eq_ignore_ascii_case("unicodePwd"))
            .and_then(|attr| attr.values.first())
        {
            let password = ad::decode_password(encoded)?;
            state.passwords.insert(dn.clone(), password);
        }
        state.entries.insert(dn, stored);
        state.writes += 1;
        Ok(())
    }

    async fn modify(&mut self, dn: &str, modifications: &[DirectoryModification]) -> Result<()> {
        let mut state = self.begin("modify")?;
        let key = DistinguishedName::parse(dn).map_err(|_| no_such_object(dn))?;
        let mut entry = state
            .entries
            .get(&key)
            .cloned()
            .ok_or_else(|| no_such_object(dn))?;

        let mut new_password = None;
        for modification in modifications {
            let attribute = modification.attribute.as_str();
            if attribute.eq_ignore_ascii_case("unicodePwd") {
                if let Some(encoded) = modification.values.first() {
                    new_password = Some(ad::decode_password(encoded)?);
                }
                continue;
            }

            match modification.op {
                ModifyOp::Add => {
                    let mut values = entry.values(attribute).cloned().unwrap_or_default();
                    for value in &modification.values {
                        if values.iter().any(|v| values_equal(attribute, v, value)) {
                            return Err(Error::from_result_code(
                                20,
                                "00002083: AtrErr: DSID-03151904",
                            ));
                        }
                        values.push(value.clone());
                    }
                    entry.set(attribute, values);
                }
                ModifyOp::Delete => {
                    if modification.values.is_empty() {
                        entry.set(attribute, Vec::new());
                        continue;
                    }
                    let values = entry
                        .values_mut(attribute)
                        .ok_or_else(|| value_not_present(attribute))?;
                    for value in &modification.values {
                        let index = values
                            .iter()
                            .position(|v| values_equal(attribute, v, value))
                            .ok_or_else(|| value_not_present(attribute))?;
                        values.remove(index);
                    }
                    let remaining = values.clone();
                    entry.set(attribute, remaining);
                }
                ModifyOp::Replace => entry.set(attribute, modification.values.clone()),
            }
        }

        if let Some(password) = new_password {
            state.passwords.insert(key.clone(), password);
        }
        state.entries.insert(key, entry);
        state.writes += 1;
        Ok(())
    }

    async fn modify_dn(
        &mut self,
        dn: &str,
        new_rdn: &str,
        _delete_old_rdn: bool,
        new_superior: &str,
    ) -> Result<()> {
        let mut state = self.begin("modify_dn")?;
        let old = DistinguishedName::parse(dn).map_err(|_| no_such_object(dn))?;
        if !state.entries.contains_key(&old) {
            return Err(no_such_object(dn));
        }
        let superior =
            DistinguishedName::parse(new_superior).map_err(|_| no_such_object(new_superior))?;
        if !state.entries.contains_key(&superior) {
            return Err(no_such_object(new_superior));
        }
        let new = DistinguishedName::parse(format!("{new_rdn},{new_superior}"))
            .map_err(|err| Error::from_result_code(34, err.to_string()))?;
        if state.entries.contains_key(&new) {
            return Err(Error::from_result_code(68, "00002071: UpdErr"));
        }

        let moved = state
            .entries
            .keys()
            .filter(|key| **key == old || key.is_descendant_of(&old))
            .cloned()
            .collect::<Vec<_>>();
        for key in moved {
            let Some(mut entry) = state.entries.remove(&key) else {
                continue;
            };
            let target = rebase(&key, &old, &new);
            if key == old {
                let leaf = new.leaf();
                entry.set(leaf.attribute(), vec![leaf.value().as_bytes().to_vec()]);
            }
            entry.dn = target.clone();
            if let Some(password) = state.passwords.remove(&key) {
                state.passwords.insert(target.clone(), password);
            }
            for group in state.entries.values_mut() {
                if let Some(members) = group.values_mut("member") {
                    for member in members.iter_mut() {
                        if parse_dn(member).is_some_and(|m| m == key) {
                            *member = target.as_str().as_bytes().to_vec();
                        }
                    }
                }
            }
            state.entries.insert(target, entry);
        }
        state.writes += 1;
        Ok(())
    }

    async fn unbind(&mut self) -> Result<()> {
        Ok(())
    }
}

fn rebase(
    dn: &DistinguishedName,
    old: &DistinguishedName,
    new: &DistinguishedName,
) -> DistinguishedName {
    let keep = dn.depth() - old.depth();
    let mut rendered = dn.components()[..keep]
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    rendered.push(new.to_string());
    DistinguishedName::parse(rendered.join(",")).unwrap()
}

fn text_attr(name: &str, values: &[&str]) -> (String, Vec<Vec<u8>>) {
    (
        name.to_string(),
        values.iter().map(|v| v.as_bytes().to_vec()).collect(),
    )
}

fn parse_dn(value: &[u8]) -> Option<DistinguishedName> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|text| DistinguishedName::parse(text).ok())
}

fn values_equal(attribute: &str, left: &[u8], right: &[u8]) -> bool {
    if DN_VALUED.iter().any(|a| a.eq_ignore_ascii_case(attribute)) {
        if let (Some(l), Some(r)) = (parse_dn(left), parse_dn(right)) {
            return l == r;
        }
    }
    match (std::str::from_utf8(left), std::str::from_utf8(right)) {
        (Ok(l), Ok(r)) => l.eq_ignore_ascii_case(r),
        _ => left == right,
    }
}

fn no_such_object(dn: &str) -> Error {
    Error::from_result_code(
        32,
        format!("0000208D: NameErr: DSID-03100288, problem 2001 (NO_OBJECT), best match of: '{dn}'"),
    )
}

// AD refuses to drop an absent `member` link with WILL_NOT_PERFORM rather than noSuchAttribute.
fn value_not_present(attribute: &str) -> Error {
    if attribute.eq_ignore_ascii_case("member") {
        Error::from_result_code(
            53,
            "00000561: SvcErr: DSID-031A1236, problem 5003 (WILL_NOT_PERFORM), data 0",
        )
    } else {
        Error::from_result_code(16, "00002080: AtrErr: DSID-03152D2C")
    }
}

/// Subset of RFC 4515 filters: `&`, `|`, `!`, presence and equality.
enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equal(String, String),
}

impl Filter {
    fn parse(input: &str) -> Result<Self> {
        let chars = input.trim().chars().collect::<Vec<_>>();
        let (filter, consumed) = Self::parse_at(&chars, 0)?;
        if consumed != chars.len() {
            return Err(bad_filter(input));
        }
        Ok(filter)
    }

    fn parse_at(chars: &[char], start: usize) -> Result<(Self, usize)> {
        let text = chars.iter().collect::<String>();
        if chars.get(start) != Some(&'(') {
            return Err(bad_filter(&text));
        }
        match chars.get(start + 1) {
            Some('&' | '|') => {
                let mut children = Vec::new();
                let mut pos = start + 2;
                while chars.get(pos) == Some(&'(') {
                    let (child, next) = Self::parse_at(chars, pos)?;
                    children.push(child);
                    pos = next;
                }
                if chars.get(pos) != Some(&')') {
                    return Err(bad_filter(&text));
                }
                let filter = if chars[start + 1] == '&' {
                    Self::And(children)
                } else {
                    Self::Or(children)
                };
                Ok((filter, pos + 1))
            }
            Some('!') => {
                let (child, next) = Self::parse_at(chars, start + 2)?;
                if chars.get(next) != Some(&')') {
                    return Err(bad_filter(&text));
                }
                Ok((Self::Not(Box::new(child)), next + 1))
            }
            _ => {
                let end = (start + 1..chars.len())
                    .find(|&i| chars[i] == ')')
                    .ok_or_else(|| bad_filter(&text))?;
                let item = chars[start + 1..end].iter().collect::<String>();
                let (attribute, value) = item.split_once('=').ok_or_else(|| bad_filter(&text))?;
                let filter = if value == "*" {
                    Self::Present(attribute.to_string())
                } else {
                    Self::Equal(attribute.to_string(), unescape_filter(value))
                };
                Ok((filter, end + 1))
            }
        }
    }

    fn matches(&self, entry: &LdapEntry) -> bool {
        match self {
            Self::And(children) => children.iter().all(|c| c.matches(entry)),
            Self::Or(children) => children.iter().any(|c| c.matches(entry)),
            Self::Not(child) => !child.matches(entry),
            Self::Present(attribute) => {
                !entry.values(attribute).is_empty() || entry.binary(attribute).is_some()
            }
            Self::Equal(attribute, expected) => entry
                .values(attribute)
                .iter()
                .any(|value| values_equal(attribute, value.as_bytes(), expected.as_bytes())),
        }
    }
}

fn unescape_filter(value: &str) -> String {
    let mut bytes = Vec::new();
    let raw = value.as_bytes();
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' {
            if let Some(Ok(byte)) = value.get(i + 1..i + 3).map(|hex| u8::from_str_radix(hex, 16)) {
                bytes.push(byte);
                i += 3;
                continue;
            }
        }
        bytes.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn bad_filter(filter: &str) -> Error {
    Error::from_result_code(87, format!("bad search filter `{filter}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn filter_matching() {
        let directory = FakeDirectory::new("DC=corp,DC=example");
        directory.seed(
            LdapEntry::new("CN=a\\28b\\29,DC=corp,DC=example")
                .with_values("objectClass", ["top", "user"])
                .with_values("sAMAccountName", ["a(b)"]),
        );
        let mut session = directory.session();

        let hits = session
            .search(
                "DC=corp,DC=example",
                SearchScope::Subtree,
                "(&(objectClass=user)(sAMAccountName=a\\28b\\29))",
                &[],
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let misses = session
            .search(
                "DC=corp,DC=example",
                SearchScope::Subtree,
                "(&(objectClass=user)(!(sAMAccountName=a\\28b\\29)))",
                &[],
            )
            .await
            .unwrap();
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn dropped_connections_fail_as_transient() {
        let directory = FakeDirectory::new("DC=corp,DC=example");
        let mut session = directory.session();
        directory.drop_connections();
        let err = session
            .search("", SearchScope::Base, "(objectClass=*)", &[])
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
