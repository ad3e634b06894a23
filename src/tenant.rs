//! Recipient routing: subdomain slug extraction and project lookup.
//!
//! Mail is addressed as `local-part@<slug>.<base-domain>`. The base domain
//! is a fixed configured string, matched case-insensitively and literally
//! (dots are not wildcards). The label immediately before the base domain
//! names the project.

use crate::error::{DevinboxError, Result};
use crate::model::Project;
use crate::storage::repo::Mailbox;

/// Resolves envelope recipients to projects.
///
/// Lookups are read-only and intentionally unscoped by account: the SMTP
/// transaction has no user session. Resolution happens once per recipient,
/// at RCPT time; callers carry the resolved [`Project`] through the rest of
/// the transaction.
#[derive(Clone)]
pub struct TenantResolver {
    base_domain: String,
    mailbox: Mailbox,
}

impl TenantResolver {
    pub fn new(base_domain: &str, mailbox: Mailbox) -> Self {
        Self {
            base_domain: base_domain.to_ascii_lowercase(),
            mailbox,
        }
    }

    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    /// Extract the project slug from an envelope recipient address.
    ///
    /// Fails with [`DevinboxError::InvalidDomain`] when the address is not
    /// of the form `local@<slug>.<base-domain>`.
    pub fn slug_of(&self, recipient: &str) -> Result<String> {
        let address = recipient
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_ascii_lowercase();

        let invalid = || DevinboxError::InvalidDomain(recipient.to_string());

        let (local, domain) = address.rsplit_once('@').ok_or_else(invalid)?;
        if local.is_empty() {
            return Err(invalid());
        }

        let subdomains = domain
            .strip_suffix(&self.base_domain)
            .and_then(|rest| rest.strip_suffix('.'))
            .ok_or_else(invalid)?;

        // The label immediately before the base domain names the project;
        // anything deeper (`x.demo.base`) is ignored.
        let slug = subdomains.rsplit('.').next().unwrap_or_default();
        if slug.is_empty() {
            return Err(invalid());
        }

        Ok(slug.to_string())
    }

    /// Resolve a recipient to its project.
    ///
    /// Fails with [`DevinboxError::InvalidDomain`] for foreign domains and
    /// [`DevinboxError::UnknownProject`] when no project has the slug.
    pub async fn resolve(&self, recipient: &str) -> Result<Project> {
        let slug = self.slug_of(recipient)?;
        self.mailbox
            .find_project_by_slug(&slug)
            .await?
            .ok_or(DevinboxError::UnknownProject(slug))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> TenantResolver {
        // slug_of never touches the database; a lazy pool is fine here.
        TenantResolver::new("devinbox.local", Mailbox::lazy_for_tests())
    }

    #[tokio::test]
    async fn extracts_slug_from_subdomain() {
        let r = resolver();
        assert_eq!(r.slug_of("hello@demo.devinbox.local").unwrap(), "demo");
        assert_eq!(r.slug_of("a.b@my-app.devinbox.local").unwrap(), "my-app");
    }

    #[tokio::test]
    async fn matching_is_case_insensitive() {
        let r = resolver();
        assert_eq!(r.slug_of("Hello@Demo.DEVINBOX.LOCAL").unwrap(), "demo");
    }

    #[tokio::test]
    async fn angle_brackets_are_stripped() {
        let r = resolver();
        assert_eq!(r.slug_of("<x@demo.devinbox.local>").unwrap(), "demo");
    }

    #[tokio::test]
    async fn deeper_labels_resolve_to_the_nearest_one() {
        let r = resolver();
        assert_eq!(r.slug_of("x@extra.demo.devinbox.local").unwrap(), "demo");
    }

    #[tokio::test]
    async fn rejects_foreign_domains() {
        let r = resolver();
        for bad in [
            "hello@demo.unknown-domain.com",
            "hello@devinbox.local",          // no subdomain label
            "hello@demo.devinbox.local.evil", // base domain not a suffix
            "hello@demodevinbox.local",       // missing dot before base
            "no-at-sign",
            "@demo.devinbox.local",
        ] {
            assert!(
                matches!(r.slug_of(bad), Err(DevinboxError::InvalidDomain(_))),
                "expected InvalidDomain for {bad:?}"
            );
        }
    }

    #[tokio::test]
    async fn dot_in_base_domain_is_literal() {
        let r = resolver();
        // "devinboxXlocal" must not match "devinbox.local".
        assert!(r.slug_of("x@demo.devinboxXlocal").is_err());
    }
}
