//! The process-wide registry of workspace instances: one `App` (config,
//! database, broker, agent) per created instance.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::info;
use uuid::Uuid;

use crush_core::app::{App, ProviderFactory};
use crush_core::config::{ensure_data_dir, Config};
use crush_core::store::Store;
use crush_shared::instance::Instance as InstanceSpec;

use crate::error::{Error, Result};

const DB_FILE: &str = "crush.db";

pub struct Instance {
    pub id: String,
    pub path: String,
    pub env: Vec<String>,
    pub app: App,
}

impl Instance {
    pub fn to_spec(&self) -> InstanceSpec {
        let cfg = self.app.config();
        InstanceSpec {
            id: self.id.clone(),
            path: self.path.clone(),
            yolo: self.app.permissions.skip_requests(),
            debug: cfg.options.debug,
            data_dir: cfg.options.data_dir.clone(),
            config: serde_json::to_value(cfg).ok(),
            env: self.env.clone(),
        }
    }
}

pub struct InstanceManager {
    instances: Mutex<HashMap<String, Arc<Instance>>>,
    factory: Arc<dyn ProviderFactory>,
}

impl InstanceManager {
    pub fn new(factory: Arc<dyn ProviderFactory>) -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            factory,
        }
    }

    /// Creates an instance for a workspace: loads its config (global file
    /// merged with the nearest `crush.json` walking upward), opens the
    /// per-workspace database, and wires an `App`. Config problems are the
    /// caller's fault (400); storage problems are ours (500).
    pub fn create(&self, spec: InstanceSpec) -> Result<InstanceSpec> {
        if spec.path.is_empty() {
            return Err(Error::bad_request("path is required"));
        }

        let data_dir = (!spec.data_dir.is_empty()).then_some(spec.data_dir.as_str());
        let mut cfg = Config::load(Path::new(&spec.path), data_dir, spec.debug, &spec.env)
            .map_err(|e| Error::bad_request(format!("failed to initialize config: {e}")))?;
        cfg.permissions.skip_requests = cfg.permissions.skip_requests || spec.yolo;
        cfg.validate()
            .map_err(|e| Error::bad_request(format!("failed to initialize config: {e}")))?;

        ensure_data_dir(cfg.data_dir())
            .context("failed to create data directory")
            .map_err(Error::from)?;
        let store = Store::open(&cfg.data_dir().join(DB_FILE)).map_err(Error::from)?;

        let app = App::new(cfg, Arc::new(store), self.factory.clone())
            .map_err(|e| Error::bad_request(e.to_string()))?;

        let instance = Arc::new(Instance {
            id: Uuid::new_v4().to_string(),
            path: spec.path,
            env: spec.env,
            app,
        });
        info!(id = %instance.id, path = %instance.path, "instance created");

        let spec = instance.to_spec();
        self.instances
            .lock()
            .unwrap()
            .insert(instance.id.clone(), instance);
        Ok(spec)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Instance>> {
        self.instances
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("instance not found"))
    }

    pub fn list(&self) -> Vec<InstanceSpec> {
        self.instances
            .lock()
            .unwrap()
            .values()
            .map(|i| i.to_spec())
            .collect()
    }

    /// Tears an instance down: agent canceled, event stream closed, database
    /// dropped. Deleting an unknown id is a no-op, like the original surface.
    pub fn delete(&self, id: &str) {
        let removed = self.instances.lock().unwrap().remove(id);
        if let Some(instance) = removed {
            info!(id = %instance.id, "instance deleted");
            instance.app.shutdown();
        }
    }

    pub fn shutdown_all(&self) {
        let drained: Vec<_> = {
            let mut instances = self.instances.lock().unwrap();
            instances.drain().map(|(_, v)| v).collect()
        };
        for instance in drained {
            instance.app.shutdown();
        }
    }
}
