use std::collections::HashMap;

use tracing::{debug, warn};

use super::Scraper;
use super::external::ExternalScraper;
use super::hiratsuka::{self, HiratsukaScraper};
use super::kanagawa::{self, KanagawaScraper};
use super::yokohama::{self, YokohamaScraper};
use crate::config::ScraperConfig;

type Factory = Box<dyn Fn() -> Box<dyn Scraper> + Send + Sync>;

/// Scraper constructors keyed by a municipality's `scraper_type`.
#[derive(Default)]
pub struct Registry {
    factories: HashMap<String, Factory>,
}

impl Registry {
    pub fn new(config: &ScraperConfig) -> Self {
        let mut registry = Self::default();

        let timeout = config.request_timeout();
        let long_timeout = config.long_request_timeout();
        let horizon_days = config.horizon_days;

        registry.register(kanagawa::NAME, move || {
            Box::new(KanagawaScraper::new(timeout, horizon_days))
        });
        registry.register(hiratsuka::NAME, move || Box::new(HiratsukaScraper::new(timeout)));
        registry.register(yokohama::NAME, move || Box::new(YokohamaScraper::new(long_timeout)));

        let external = &config.external;
        for site in &external.sites {
            if registry.contains(site) {
                warn!(site = %site, "External site shadows a native scraper, keeping native");
                continue;
            }
            let (site_name, interpreter, script) = (
                site.clone(),
                external.interpreter.clone(),
                external.script.clone(),
            );
            registry.register(site, move || {
                Box::new(ExternalScraper::new(
                    site_name.clone(),
                    interpreter.clone(),
                    script.clone(),
                    long_timeout,
                ))
            });
            debug!(site = %site, "Registered external scraper");
        }

        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Scraper> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// A fresh scraper, or `None` for an unregistered name.
    pub fn get(&self, name: &str) -> Option<Box<dyn Scraper>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExternalScraperConfig, ScraperConfig};

    #[test]
    fn native_scrapers_are_registered() {
        let registry = Registry::new(&ScraperConfig::default());
        assert_eq!(registry.names(), vec!["hiratsuka", "kanagawa", "yokohama"]);
        assert_eq!(registry.get("yokohama").unwrap().name(), "yokohama");
        assert!(registry.get("ayase").is_none());
    }

    #[test]
    fn external_sites_fill_gaps_only() {
        let config = ScraperConfig {
            external: ExternalScraperConfig {
                interpreter: "python3".to_string(),
                script: "scraper_wrapper.py".to_string(),
                sites: vec!["ayase".to_string(), "hiratsuka".to_string()],
            },
            ..ScraperConfig::default()
        };
        let registry = Registry::new(&config);
        assert_eq!(
            registry.names(),
            vec!["ayase", "hiratsuka", "kanagawa", "yokohama"]
        );
        assert_eq!(registry.get("ayase").unwrap().name(), "ayase");
    }
}
