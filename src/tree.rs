// src/tree.rs - Named collection of PVs with NAME / NAME.FIELD lookup
use crate::common::CommonPv;
use crate::config::TreeConfig;
use crate::error::{PvError, Result};
use crate::field::FieldId;
use crate::host::Host;
use crate::pv::ProcessVariable;
use log::info;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// PVs built from one configuration, addressable by name
///
/// ```rust
/// use marte_pv::{ProcessVariable, PvTree, TreeConfig};
///
/// let config = TreeConfig::from_yaml("pvs:\n  TEMP:\n    TYPE: float64\n")?;
/// let tree = PvTree::build(&config)?;
///
/// let prec = tree.resolve("TEMP.PREC")?;
/// assert_eq!(prec.name(), "TEMP.PREC");
/// # Ok::<(), marte_pv::PvError>(())
/// ```
#[derive(Default)]
pub struct PvTree {
    pvs: BTreeMap<String, Arc<CommonPv>>,
}

impl PvTree {
    /// Build every PV; the first failing one aborts the whole tree
    pub fn build(config: &TreeConfig) -> Result<Self> {
        let mut pvs = BTreeMap::new();
        for (name, pv_config) in &config.pvs {
            if name.is_empty() || name.contains('.') {
                return Err(PvError::Config(format!("invalid PV name '{}'", name)));
            }
            let pv = CommonPv::new(name, pv_config)
                .map_err(|e| PvError::Config(format!("PV '{}': {}", name, e)))?;
            pvs.insert(name.clone(), pv);
        }
        info!("Built PV tree with {} PVs", pvs.len());
        Ok(Self { pvs })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(&TreeConfig::from_file(path)?)
    }

    pub fn get(&self, name: &str) -> Option<Arc<CommonPv>> {
        self.pvs.get(name).cloned()
    }

    /// Look up `NAME` or `NAME.FIELD`; `NAME.VAL` is the PV itself
    pub fn resolve(&self, path: &str) -> Result<Arc<dyn ProcessVariable>> {
        let (name, field) = match path.split_once('.') {
            Some((name, field)) => (name, Some(field.parse::<FieldId>()?)),
            None => (path, None),
        };
        let pv = self
            .pvs
            .get(name)
            .ok_or_else(|| PvError::NotFound(name.to_string()))?;

        match field {
            None | Some(FieldId::Value) => Ok(pv.clone()),
            Some(field) => pv
                .field(field)
                .map(|proxy| proxy as Arc<dyn ProcessVariable>)
                .ok_or_else(|| PvError::UnknownField(path.to_string())),
        }
    }

    /// Attach `host` to every PV and field proxy
    pub fn set_host(&self, host: Arc<dyn Host>) {
        for pv in self.pvs.values() {
            pv.set_host(host.clone());
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pvs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pvs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pvs.is_empty()
    }
}
