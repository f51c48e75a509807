//! Existence checks and top-down materialisation of DN hierarchies.

use crate::{
    dn::{ComponentKind, DistinguishedName},
    session::{EntryAttribute, LdapSession, SearchScope},
    Result,
};
use dirprobe_core::Error;
use tracing::{debug, info};

const EXISTENCE_ATTRIBUTES: &[&str] = &["objectClass"];

/// Returns true if a base-scope read of `dn` yields an entry.
///
/// "No such object" is a negative answer; every other failure propagates.
pub(crate) async fn exists(session: &mut dyn LdapSession, dn: &DistinguishedName) -> Result<bool> {
    match session
        .search(
            dn.as_str(),
            SearchScope::Base,
            "(objectClass=*)",
            EXISTENCE_ATTRIBUTES,
        )
        .await
    {
        Ok(entries) => Ok(!entries.is_empty()),
        Err(err) if err.is_no_such_object() => Ok(false),
        Err(err) => Err(err),
    }
}

/// Creates every missing level of `dn`, root first, and returns the DNs it created.
///
/// `CN=` levels become `container` entries and `OU=` levels `organizationalUnit` entries.
/// `DC=` levels are assumed to exist. A level created concurrently by someone else counts
/// as present.
pub(crate) async fn ensure_exists(
    session: &mut dyn LdapSession,
    dn: &DistinguishedName,
) -> Result<Vec<DistinguishedName>> {
    if let Some(rdn) = dn
        .components()
        .iter()
        .find(|rdn| rdn.kind() == ComponentKind::Other)
    {
        return Err(unsupported(&rdn.to_string(), dn));
    }

    let mut created = Vec::new();
    for level in dn.ancestry() {
        let leaf = level.leaf();
        let object_class = match leaf.kind() {
            ComponentKind::DomainComponent => continue,
            ComponentKind::Container => "container",
            ComponentKind::OrganizationalUnit => "organizationalUnit",
            ComponentKind::Other => return Err(unsupported(&leaf.to_string(), dn)),
        };

        if exists(session, &level).await? {
            continue;
        }

        let attributes = [
            EntryAttribute::text("objectClass", ["top", object_class]),
            EntryAttribute::text(leaf.attribute().to_ascii_lowercase(), [leaf.value()]),
        ];
        match session.add(level.as_str(), &attributes).await {
            Ok(()) => {
                info!(dn = %level, object_class, "created path component");
                created.push(level);
            }
            Err(err) if err.is_already_exists() => {
                debug!(dn = %level, "path component appeared concurrently");
            }
            Err(err) => return Err(err),
        }
    }

    Ok(created)
}

fn unsupported(component: &str, dn: &DistinguishedName) -> Error {
    Error::Path(format!(
        "unsupported component `{component}` in `{dn}`; only CN=, OU= and DC= can be created"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDirectory;

    fn dn(value: &str) -> DistinguishedName {
        DistinguishedName::parse(value).unwrap()
    }

    #[tokio::test]
    async fn exists_reports_missing_as_false() {
        let directory = FakeDirectory::new("DC=corp,DC=example");
        let mut session = directory.session();

        assert!(exists(&mut session, &dn("DC=corp,DC=example")).await.unwrap());
        assert!(!exists(&mut session, &dn("OU=Nope,DC=corp,DC=example"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn exists_propagates_other_failures() {
        let directory = FakeDirectory::new("DC=corp,DC=example");
        directory.fail_next("search", Error::from_result_code(50, "access denied"));
        let mut session = directory.session();

        let err = exists(&mut session, &dn("OU=Staff,DC=corp,DC=example"))
            .await
            .unwrap_err();
        assert!(!err.is_no_such_object());
    }

    #[tokio::test]
    async fn creates_missing_levels_top_down() {
        let directory = FakeDirectory::new("DC=corp,DC=example");
        let mut session = directory.session();

        let created = ensure_exists(
            &mut session,
            &dn("CN=Service,OU=Apps,OU=Staff,DC=corp,DC=example"),
        )
        .await
        .unwrap();

        let created = created.iter().map(ToString::to_string).collect::<Vec<_>>();
        assert_eq!(
            created,
            vec![
                "OU=Staff,DC=corp,DC=example",
                "OU=Apps,OU=Staff,DC=corp,DC=example",
                "CN=Service,OU=Apps,OU=Staff,DC=corp,DC=example",
            ]
        );
        assert!(directory
            .entry("OU=Apps,OU=Staff,DC=corp,DC=example")
            .unwrap()
            .has_object_class("organizationalUnit"));
        assert!(directory
            .entry("CN=Service,OU=Apps,OU=Staff,DC=corp,DC=example")
            .unwrap()
            .has_object_class("container"));
    }

    #[tokio::test]
    async fn ensure_exists_is_idempotent() {
        let directory = FakeDirectory::new("DC=corp,DC=example");
        let mut session = directory.session();
        let target = dn("OU=Apps,OU=Staff,DC=corp,DC=example");

        assert_eq!(ensure_exists(&mut session, &target).await.unwrap().len(), 2);
        let before = directory.entry_count();
        assert!(ensure_exists(&mut session, &target).await.unwrap().is_empty());
        assert_eq!(directory.entry_count(), before);
    }

    #[tokio::test]
    async fn concurrent_creation_counts_as_success() {
        let directory = FakeDirectory::new("DC=corp,DC=example");
        directory.fail_next("add", Error::from_result_code(68, "ENTRY_EXISTS"));
        let mut session = directory.session();

        let created = ensure_exists(&mut session, &dn("OU=Staff,DC=corp,DC=example"))
            .await
            .unwrap();
        assert!(created.is_empty());
    }

    #[tokio::test]
    async fn unsupported_components_are_rejected_before_writes() {
        let directory = FakeDirectory::new("DC=corp,DC=example");
        let mut session = directory.session();
        let before = directory.entry_count();

        let err = ensure_exists(&mut session, &dn("UID=x,OU=Staff,DC=corp,DC=example"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Path(_)));
        assert_eq!(directory.entry_count(), before);
    }
}
