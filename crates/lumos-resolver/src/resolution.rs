//! The immutable result of target resolution, shared by every worker

use std::collections::{BTreeMap, HashMap};

use lumos_model::{Interner, MethodKey, ResolvedTarget, WeaveError};

use crate::hierarchy::ClassHierarchy;

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub(crate) interner: Interner,
    pub(crate) hierarchy: ClassHierarchy,
    pub(crate) targets: HashMap<MethodKey, ResolvedTarget>,
    /// Targets related by overriding, for every member of a group of two or more
    pub(crate) families: HashMap<MethodKey, Vec<MethodKey>>,
    /// Target keys per declaring unit, by method index
    pub(crate) by_unit: HashMap<String, Vec<MethodKey>>,
    /// Units that must stay unmodified this pass
    pub(crate) blocked_units: BTreeMap<String, WeaveError>,
    pub(crate) warnings: Vec<WeaveError>,
    pub(crate) errors: Vec<WeaveError>,
}

impl Resolution {
    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    pub fn hierarchy(&self) -> &ClassHierarchy {
        &self.hierarchy
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn target(&self, key: &MethodKey) -> Option<&ResolvedTarget> {
        self.targets.get(key)
    }

    /// All targets ordered by unit and method index
    pub fn targets(&self) -> Vec<&ResolvedTarget> {
        let mut all: Vec<&ResolvedTarget> = self.targets.values().collect();
        all.sort_by(|a, b| (&a.unit, a.method_index).cmp(&(&b.unit, b.method_index)));
        all
    }

    /// Targets declared in `unit`, by method index
    pub fn targets_in(&self, unit: &str) -> Vec<&ResolvedTarget> {
        self.by_unit
            .get(unit)
            .map(|keys| keys.iter().filter_map(|k| self.targets.get(k)).collect())
            .unwrap_or_default()
    }

    /// Target declared at `method_index` of `unit`
    pub fn target_at(&self, unit: &str, method_index: usize) -> Option<&ResolvedTarget> {
        self.targets_in(unit)
            .into_iter()
            .find(|t| t.method_index == method_index)
    }

    /// Key of `owner.name descriptor` if all three names are known
    pub fn key_of(&self, owner: &str, name: &str, descriptor: &str) -> Option<MethodKey> {
        Some(MethodKey {
            owner: self.interner.get(owner)?,
            name: self.interner.get(name)?,
            descriptor: self.interner.get(descriptor)?,
        })
    }

    /// Target of an invocation referencing `owner.name descriptor`
    ///
    /// The referenced class is searched first, then its supertypes in the
    /// artifact set, mirroring JVM method resolution.
    pub fn resolve_invocation(&self, owner: &str, name: &str, descriptor: &str) -> Option<&ResolvedTarget> {
        let name_sym = self.interner.get(name)?;
        let descriptor_sym = self.interner.get(descriptor)?;
        let lookup = |class: &str| {
            let owner_sym = self.interner.get(class)?;
            self.targets.get(&MethodKey {
                owner: owner_sym,
                name: name_sym,
                descriptor: descriptor_sym,
            })
        };
        if let Some(target) = lookup(owner) {
            return Some(target);
        }
        self.hierarchy.ancestors(owner).into_iter().find_map(lookup)
    }

    /// Why `unit` must stay unmodified, if it must
    pub fn unit_error(&self, unit: &str) -> Option<&WeaveError> {
        self.blocked_units.get(unit)
    }

    pub fn blocked_units(&self) -> impl Iterator<Item = (&str, &WeaveError)> {
        self.blocked_units.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Targets whose signatures change together with `key`'s, itself included
    pub fn family<'a>(&'a self, key: &'a MethodKey) -> &'a [MethodKey] {
        self.families.get(key).map(Vec::as_slice).unwrap_or(std::slice::from_ref(key))
    }

    /// Whether the target's signature cannot change this pass
    ///
    /// A target is blocked when its own unit or the unit of any method it is
    /// related to by overriding must stay unmodified.
    pub fn is_blocked(&self, key: &MethodKey) -> bool {
        let Some(target) = self.targets.get(key) else {
            return false;
        };
        !target.already_woven
            && self.family(key).iter().any(|k| {
                self.targets
                    .get(k)
                    .is_some_and(|t| !t.already_woven && self.blocked_units.contains_key(&t.unit))
            })
    }

    /// Non-fatal diagnostics (unresolved descriptors)
    pub fn warnings(&self) -> &[WeaveError] {
        &self.warnings
    }

    /// Pass-level errors (ambiguous targets)
    pub fn errors(&self) -> &[WeaveError] {
        &self.errors
    }
}
