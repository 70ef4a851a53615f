//! Component registry: explicit name → factory map.
//!
//! Every component type that can be created declaratively (element-request
//! facets) or restored from a snapshot registers here under its stable type
//! name, together with a serializer version for its persistent state. The
//! version is recorded in snapshots; restoration refuses a snapshot written
//! by a newer serializer than the registered one.

use ahash::AHashMap;
use serde_json::Value;

use crate::component::Component;

pub type ComponentFactory = Box<dyn Fn(Option<&Value>) -> anyhow::Result<Box<dyn Component>>>;

struct Registration {
    version: u32,
    factory: ComponentFactory,
}

#[derive(Default)]
pub struct ComponentRegistry {
    entries: AHashMap<String, Registration>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        version: u32,
        factory: impl Fn(Option<&Value>) -> anyhow::Result<Box<dyn Component>> + 'static,
    ) {
        let name = name.into();
        tracing::debug!(target: "space.components", name = name.as_str(), version, "component_type_registered");
        self.entries.insert(
            name,
            Registration {
                version,
                factory: Box::new(factory),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn version_of(&self, name: &str) -> Option<u32> {
        self.entries.get(name).map(|r| r.version)
    }

    pub fn create(&self, name: &str, config: Option<&Value>) -> anyhow::Result<Box<dyn Component>> {
        let reg = self
            .entries
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("unknown component type `{name}`"))?;
        (reg.factory)(config)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("names", &self.names())
            .finish()
    }
}
