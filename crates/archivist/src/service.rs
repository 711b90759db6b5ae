//! Submission interface: the boundary the CLI (or any other front end) uses.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::abid::{guard_mutation, Abid};
use crate::binaries::BinaryResolver;
use crate::config::Settings;
use crate::error::{ArchiveError, ArchiveResult};
use crate::extractors::ExtractorRegistry;
use crate::lifecycle::RetryPolicy;
use crate::models::{ArchiveOptions, HistoryRecord, Job, Link, LinkStatus};
use crate::orchestrator::Orchestrator;
use crate::output::OutputLayout;
use crate::repository::{run_migrations, ArchiveStore, DieselStore, SqlitePool};

const ALLOWED_SCHEMES: [&str; 3] = ["http", "https", "ftp"];

/// A link with everything known about it.
#[derive(Debug, Clone, Serialize)]
pub struct LinkSnapshot {
    pub link: Link,
    pub jobs: Vec<Job>,
    pub latest: BTreeMap<String, String>,
    pub history: Vec<HistoryRecord>,
}

/// Operator edits to a link. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct LinkEdit {
    pub url: Option<String>,
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
}

pub struct Archivist {
    settings: Settings,
    store: Arc<dyn ArchiveStore>,
    registry: Arc<ExtractorRegistry>,
    layout: OutputLayout,
    salt: String,
}

impl Archivist {
    /// Open the archive described by `settings`: directories, database
    /// (migrated), salt and the configured extractors.
    pub async fn open(settings: Settings) -> ArchiveResult<Self> {
        settings.ensure_directories()?;
        let database_url = settings.database_url();
        run_migrations(&database_url).await?;
        let store: Arc<dyn ArchiveStore> = Arc::new(DieselStore::new(SqlitePool::new(&database_url)));
        let resolver = Arc::new(BinaryResolver::new(settings.binary_cache_ttl));
        let registry = ExtractorRegistry::from_settings(&settings, resolver);
        Self::with_store(settings, store, registry)
    }

    /// Assemble from parts; used with [`crate::repository::MemoryStore`] and
    /// custom extractors.
    pub fn with_store(
        settings: Settings,
        store: Arc<dyn ArchiveStore>,
        registry: ExtractorRegistry,
    ) -> ArchiveResult<Self> {
        let salt = settings.resolve_salt()?;
        let layout = OutputLayout::from_settings(&settings);
        if registry.is_empty() {
            tracing::warn!("No extractors enabled; links will seal without artifacts");
        }
        Ok(Self {
            settings,
            store,
            registry: Arc::new(registry),
            layout,
            salt,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn ArchiveStore> {
        &self.store
    }

    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Queue a URL for archiving.
    ///
    /// A URL that is already known returns the existing link's id, with
    /// `tags` merged into it; `options` then apply only to new links.
    pub async fn submit(
        &self,
        url: &str,
        tags: Vec<String>,
        options: ArchiveOptions,
    ) -> ArchiveResult<Abid> {
        let (url, domain) = normalize_url(url)?;

        if let Some(existing) = self.store.find_link_by_url(&url).await? {
            return self.merge_into(existing, tags).await;
        }

        let link = Link::new(url.clone(), domain, tags.clone(), options, &self.salt, Utc::now());
        if self.store.insert_link(&link).await? {
            info!("Queued {} as {}", link.url, link.id);
            return Ok(link.id);
        }

        // Lost an insert race against another submitter of the same URL.
        let existing = self
            .store
            .find_link_by_url(&url)
            .await?
            .ok_or(ArchiveError::LinkNotFound(url))?;
        self.merge_into(existing, tags).await
    }

    async fn merge_into(&self, mut link: Link, tags: Vec<String>) -> ArchiveResult<Abid> {
        if link.merge_tags(tags) {
            self.store.update_link_metadata(&link).await?;
        }
        debug!("{} already archived as {}", link.url, link.id);
        Ok(link.id)
    }

    async fn load_link(&self, id: &Abid) -> ArchiveResult<Link> {
        self.store
            .get_link(id)
            .await?
            .ok_or_else(|| ArchiveError::LinkNotFound(id.to_string()))
    }

    pub async fn get_status(&self, id: &Abid) -> ArchiveResult<LinkSnapshot> {
        let link = self.load_link(id).await?;
        Ok(LinkSnapshot {
            jobs: self.store.jobs_for_link(id).await?,
            latest: self.store.latest(id).await?,
            history: self.store.history(id, None).await?,
            link,
        })
    }

    pub async fn list_links(
        &self,
        status: Option<LinkStatus>,
        limit: usize,
    ) -> ArchiveResult<Vec<Link>> {
        Ok(self.store.list_links(status, limit).await?)
    }

    /// Run a sealed link through the pipeline again.
    ///
    /// Jobs go back to queued with a fresh retry budget. Without
    /// `overwrite`, extractors whose artifact exists record a skip.
    pub async fn rearchive(&self, id: &Abid, overwrite: bool) -> ArchiveResult<()> {
        let mut link = self.load_link(id).await?;
        if link.status != LinkStatus::Sealed {
            return Err(ArchiveError::InProgress(id.to_string()));
        }

        // Workers read the overwrite flag as soon as a job is queued again.
        link.options.overwrite = overwrite;
        if !self.store.update_link(&link, LinkStatus::Sealed).await? {
            return Err(ArchiveError::InProgress(id.to_string()));
        }

        let now = Utc::now();
        for mut job in self.store.jobs_for_link(id).await? {
            let expected = job.status;
            job.reset(now);
            if !self.store.update_job(&job, expected).await? {
                debug!("Job {} changed while resetting", job.id);
            }
        }

        link.reopen(now, overwrite);
        if !self.store.update_link(&link, LinkStatus::Sealed).await? {
            return Err(ArchiveError::InProgress(id.to_string()));
        }
        info!("Re-queued {} (overwrite: {})", link.id, overwrite);
        Ok(())
    }

    /// Apply operator edits. Changing the URL of a link would change its
    /// identifier and is refused with [`ArchiveError::IdentifierConflict`].
    pub async fn edit_link(&self, id: &Abid, edit: LinkEdit) -> ArchiveResult<Link> {
        let mut link = self.load_link(id).await?;
        if let Some(url) = edit.url {
            let (url, domain) = normalize_url(&url)?;
            link.url = url;
            link.domain = domain;
        }
        if let Some(title) = edit.title {
            let title = title.trim().to_string();
            link.title = (!title.is_empty()).then_some(title);
        }
        if let Some(tags) = edit.tags {
            link.tags.clear();
            link.merge_tags(tags);
        }

        guard_mutation(&link, &self.salt)?;
        self.store.update_link_metadata(&link).await?;
        Ok(link)
    }

    /// Worker pools over this archive.
    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.store.clone(),
            self.registry.clone(),
            self.layout.clone(),
            self.salt.clone(),
            &self.settings.workers,
            RetryPolicy {
                max_retries: self.settings.retry.max_retries,
            },
        )
    }
}

/// Parse and canonicalise a submitted URL; returns it with its domain.
pub fn normalize_url(raw: &str) -> ArchiveResult<(String, String)> {
    let invalid = |reason: &str| ArchiveError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    let mut url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !ALLOWED_SCHEMES.contains(&url.scheme()) {
        return Err(invalid("only http, https and ftp URLs can be archived"));
    }
    let domain = url
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .ok_or_else(|| invalid("missing host"))?;
    url.set_fragment(None);
    Ok((url.to_string(), domain))
}
