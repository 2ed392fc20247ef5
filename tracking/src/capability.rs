//! Loading of the external vision-engine modules and construction of the
//! hand-tracking capability they provide.
//!
//! Copyright (C) 2025  Ardalan Amiri Sani
//!
//! This program is free software: you can redistribute it and/or modify
//! it under the terms of the GNU General Public License as published by
//! the Free Software Foundation, either version 3 of the License, or
//! (at your option) any later version.
//!
//! This program is distributed in the hope that it will be useful,
//! but WITHOUT ANY WARRANTY; without even the implied warranty of
//! MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//! GNU General Public License for more details.
//!
//! You should have received a copy of the GNU General Public License
//! along with this program.  If not, see <https://www.gnu.org/licenses/>.

use crate::config::{
    MAX_NUM_HANDS, MIN_DETECTION_CONFIDENCE, MIN_TRACKING_CONFIDENCE, MODEL_COMPLEXITY,
};
use crate::frame::{Detection, VideoFrame};
use anyhow::Error;
use log::{debug, info};
use reqwest::blocking::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to load capability module {url}: {reason}")]
    LoadFailure { url: String, reason: String },
    #[error("capability modules loaded but the capability could not be built: {0}")]
    Unresolved(String),
}

/// Options handed to the engine when an instance is created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VisionOptions {
    pub max_num_hands: u32,
    pub model_complexity: u8,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
}

impl Default for VisionOptions {
    fn default() -> Self {
        Self {
            max_num_hands: MAX_NUM_HANDS,
            model_complexity: MODEL_COMPLEXITY,
            min_detection_confidence: MIN_DETECTION_CONFIDENCE,
            min_tracking_confidence: MIN_TRACKING_CONFIDENCE,
        }
    }
}

/// A live engine instance. `process` blocks until the frame is analyzed.
pub trait HandEngine: Send {
    fn process(&mut self, frame: &VideoFrame) -> Result<Detection, Error>;
}

pub trait VisionCapability: Send + Sync {
    fn name(&self) -> String;
    fn create_engine(&self, options: &VisionOptions) -> Result<Box<dyn HandEngine>, Error>;
}

pub struct CapabilityModule {
    pub url: String,
    pub source: Vec<u8>,
}

pub trait ModuleFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, Error>;
}

/// Turns the registered modules into a usable capability.
pub trait CapabilityFactory: Send + Sync {
    fn build(&self, modules: &[Arc<CapabilityModule>]) -> Result<Arc<dyn VisionCapability>, Error>;
}

pub struct HttpModuleFetcher {
    client: Client,
}

impl HttpModuleFetcher {
    pub fn new(timeout: Duration) -> io::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        Ok(Self { client })
    }
}

impl ModuleFetcher for HttpModuleFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, Error> {
        let response = self.client.get(url).send()?.error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }
}

type ModuleSlot = Arc<Mutex<Option<Arc<CapabilityModule>>>>;

pub struct CapabilityLoader {
    fetcher: Box<dyn ModuleFetcher>,
    factory: Box<dyn CapabilityFactory>,
    registry: Mutex<HashMap<String, ModuleSlot>>,
    resolved: Mutex<Option<Arc<dyn VisionCapability>>>,
}

impl CapabilityLoader {
    pub fn new(fetcher: Box<dyn ModuleFetcher>, factory: Box<dyn CapabilityFactory>) -> Self {
        Self {
            fetcher,
            factory,
            registry: Mutex::new(HashMap::new()),
            resolved: Mutex::new(None),
        }
    }

    fn slot(&self, url: &str) -> ModuleSlot {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(registry.entry(url.to_string()).or_default())
    }

    pub fn is_registered(&self, url: &str) -> bool {
        let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        match registry.get(url) {
            Some(slot) => slot.lock().unwrap_or_else(PoisonError::into_inner).is_some(),
            None => false,
        }
    }

    /// Loads the modules one after the other, in the given order.
    /// Later modules rely on earlier ones, so nothing is fetched in parallel.
    /// A URL that is already registered is skipped. Concurrent callers asking
    /// for the same URL wait on its slot instead of fetching it again.
    pub fn ensure_loaded(&self, urls: &[String]) -> Result<Vec<Arc<CapabilityModule>>, LoadError> {
        let mut modules = Vec::with_capacity(urls.len());

        for url in urls {
            let slot = self.slot(url);
            let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);

            if let Some(module) = entry.as_ref() {
                debug!("Capability module {url} already registered");
                modules.push(Arc::clone(module));
                continue;
            }

            info!("Loading capability module {url}");
            let source = self.fetcher.fetch(url).map_err(|e| LoadError::LoadFailure {
                url: url.clone(),
                reason: e.to_string(),
            })?;
            if source.is_empty() {
                return Err(LoadError::LoadFailure {
                    url: url.clone(),
                    reason: "empty module".to_string(),
                });
            }

            let module = Arc::new(CapabilityModule {
                url: url.clone(),
                source,
            });
            *entry = Some(Arc::clone(&module));
            modules.push(module);
        }

        Ok(modules)
    }

    /// Loads the modules and returns the capability built from them.
    /// The capability is built once and cached.
    pub fn resolve(&self, urls: &[String]) -> Result<Arc<dyn VisionCapability>, LoadError> {
        let modules = self.ensure_loaded(urls)?;

        let mut resolved = self.resolved.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(capability) = resolved.as_ref() {
            return Ok(Arc::clone(capability));
        }

        let capability = self
            .factory
            .build(&modules)
            .map_err(|e| LoadError::Unresolved(e.to_string()))?;
        info!("Vision capability {} ready", capability.name());
        *resolved = Some(Arc::clone(&capability));

        Ok(capability)
    }
}
