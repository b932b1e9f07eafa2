//! Local record of the demo audiences and pages that replayed experience events
//! are pointed at.

use crate::error::{SeedError, SeedResult};
use crate::rewrite::{DemoTarget, RewriteContext};
use eventseed_config::{SiteConfig, SourceConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

pub const PERSONALIZATION_PAGE_MARKER: &str = "demo_data";
pub const AB_TEST_PAGE_MARKER: &str = "demo_data_abtest";

const PERSONALIZATION_PAGE_TITLE: &str = "Insights Demo";
const AB_TEST_PAGE_TITLE: &str = "A/B Test Block Demo";

/// Title and country rule of each demo audience. Sorted by slug this gives the
/// first (FR) and second (JP) audience.
const DEMO_AUDIENCES: [(&str, &str); 2] = [("France", "FR"), ("Japan", "JP")];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoAudience {
    pub id: u64,
    pub title: String,
    pub slug: String,
    /// Matches `endpoint.Location.Country`.
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoPage {
    pub id: u64,
    pub title: String,
    pub url: String,
    pub marker: String,
    /// Audiences targeted by the page's personalized variants.
    #[serde(default)]
    pub audience_ids: Vec<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemoSetup {
    pub audiences_created: usize,
    pub audiences_deleted: usize,
    pub pages_created: usize,
}

impl DemoSetup {
    pub fn changed(&self) -> bool {
        self.audiences_created + self.audiences_deleted + self.pages_created > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoCatalog {
    #[serde(default)]
    pub audiences: Vec<DemoAudience>,
    #[serde(default)]
    pub pages: Vec<DemoPage>,
    #[serde(default)]
    next_id: u64,
}

impl DemoCatalog {
    /// Reads the catalog, or starts an empty one when the file does not exist yet.
    pub fn load(path: impl AsRef<Path>) -> SeedResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|exc| {
            SeedError::catalog(format!("failed to read {}: {}", path.display(), exc))
        })?;
        serde_json::from_str(&content).map_err(|exc| {
            SeedError::catalog(format!("failed to parse {}: {}", path.display(), exc))
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> SeedResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|exc| {
                SeedError::catalog(format!("failed to create {}: {}", parent.display(), exc))
            })?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|exc| SeedError::catalog(format!("failed to encode catalog: {exc}")))?;
        std::fs::write(path, content).map_err(|exc| {
            SeedError::catalog(format!("failed to write {}: {}", path.display(), exc))
        })
    }

    /// Loads the catalog at `path`, creates whatever demo objects are missing and
    /// writes it back when anything changed.
    pub fn ensure_at(path: impl AsRef<Path>, base_url: &str) -> SeedResult<(Self, DemoSetup)> {
        let path = path.as_ref();
        let mut catalog = Self::load(path)?;
        let setup = catalog.ensure_demo_objects(base_url);
        if setup.changed() {
            catalog.save(path)?;
        }
        Ok((catalog, setup))
    }

    /// Creates whatever demo audiences and pages are missing. Safe to call
    /// repeatedly: a complete catalog is left untouched.
    pub fn ensure_demo_objects(&mut self, base_url: &str) -> DemoSetup {
        let mut setup = DemoSetup::default();

        match self.audiences.len() {
            2 => {}
            count => {
                if count > 0 {
                    warn!("found {} demo audiences, recreating both", count);
                }
                setup.audiences_deleted = count;
                // Deleted ids are never handed out again.
                self.next_id = self.next_id.max(self.max_id());
                self.audiences.clear();
                for (title, country) in DEMO_AUDIENCES {
                    let id = self.allocate_id();
                    self.audiences.push(DemoAudience {
                        id,
                        title: title.to_string(),
                        slug: title.to_lowercase(),
                        country: country.to_string(),
                    });
                    setup.audiences_created += 1;
                }
                self.audiences.sort_by(|a, b| a.slug.cmp(&b.slug));
            }
        }

        let base_url = base_url.trim_end_matches('/');
        let audience_ids: Vec<u64> = self.audiences.iter().map(|a| a.id).collect();
        for (marker, title, audience_ids) in [
            (
                PERSONALIZATION_PAGE_MARKER,
                PERSONALIZATION_PAGE_TITLE,
                audience_ids,
            ),
            (AB_TEST_PAGE_MARKER, AB_TEST_PAGE_TITLE, Vec::new()),
        ] {
            if self.page(marker).is_some() {
                continue;
            }
            let id = self.allocate_id();
            self.pages.push(DemoPage {
                id,
                title: title.to_string(),
                url: format!("{}/{}/", base_url, slugify(title)),
                marker: marker.to_string(),
                audience_ids,
            });
            setup.pages_created += 1;
        }

        if setup.changed() {
            info!(
                "demo catalog updated: {} audiences created, {} deleted, {} pages created",
                setup.audiences_created, setup.audiences_deleted, setup.pages_created
            );
        }
        setup
    }

    pub fn page(&self, marker: &str) -> Option<&DemoPage> {
        self.pages.iter().find(|page| page.marker == marker)
    }

    /// Audiences in slug order, which fixes which one is first and second.
    pub fn sorted_audiences(&self) -> Vec<&DemoAudience> {
        let mut audiences: Vec<&DemoAudience> = self.audiences.iter().collect();
        audiences.sort_by(|a, b| a.slug.cmp(&b.slug));
        audiences
    }

    /// Rewrite context for `site` pointing experience events at these objects.
    pub fn rewrite_context(&self, source: &SourceConfig, site: &SiteConfig) -> RewriteContext {
        let audiences = self.sorted_audiences();
        let audience_id = |idx: usize| audiences.get(idx).map(|a| a.id.to_string());
        let target = |marker: &str| {
            self.page(marker).map(|page| DemoTarget {
                id: page.id.to_string(),
                url: page.url.clone(),
            })
        };

        RewriteContext {
            audience_ids: [audience_id(0), audience_id(1)],
            personalization_page: target(PERSONALIZATION_PAGE_MARKER),
            ab_test_page: target(AB_TEST_PAGE_MARKER),
            ..RewriteContext::from_config(source, site)
        }
    }

    fn max_id(&self) -> u64 {
        self.audiences
            .iter()
            .map(|a| a.id)
            .chain(self.pages.iter().map(|p| p.id))
            .max()
            .unwrap_or_default()
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id = self.next_id.max(self.max_id()) + 1;
        self.next_id
    }
}

fn slugify(title: &str) -> String {
    title
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}
