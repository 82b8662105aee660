//! Structural matching of descriptors against compiled methods

use std::collections::{BTreeMap, HashMap, HashSet};

use lumos_classfile::annotation::has_annotation;
use lumos_classfile::{FieldType, MethodDescriptor};
use lumos_model::{
    CompilationUnit, Interner, MatchOrigin, MethodInfo, MethodKey, ResolvedTarget, SourceLanguage,
    TargetDescriptor, WeaveError,
};

use crate::hierarchy::ClassHierarchy;
use crate::resolution::Resolution;

/// Settings that shape resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Internal name of the metadata class appended to targets
    pub metadata_class: String,
    /// Internal name of the marker annotation; `None` disables annotation targeting
    pub marker_annotation: Option<String>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            metadata_class: lumos_model::DEFAULT_METADATA_CLASS.to_string(),
            marker_annotation: Some(lumos_model::DEFAULT_MARKER_ANNOTATION.to_string()),
        }
    }
}

/// A method as seen by matching: its pre-weave descriptor and weave state
struct Candidate<'u> {
    unit_index: usize,
    method_index: usize,
    method: &'u MethodInfo,
    logical: String,
    parsed: MethodDescriptor,
    already_woven: bool,
}

pub(crate) struct Resolver<'a> {
    units: &'a [CompilationUnit],
    descriptors: &'a [TargetDescriptor],
    options: &'a ResolveOptions,
    metadata_type: FieldType,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(
        units: &'a [CompilationUnit],
        descriptors: &'a [TargetDescriptor],
        options: &'a ResolveOptions,
    ) -> Self {
        Self {
            units,
            descriptors,
            options,
            metadata_type: FieldType::object(options.metadata_class.clone()),
        }
    }

    pub(crate) fn resolve(&self) -> Resolution {
        let hierarchy = ClassHierarchy::build(self.units);
        let mut interner = Interner::new();
        let mut targets: HashMap<MethodKey, ResolvedTarget> = HashMap::new();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // Identical descriptors listed twice count once
        let mut unique: Vec<usize> = Vec::new();
        for (i, d) in self.descriptors.iter().enumerate() {
            if !unique.iter().any(|&j| self.descriptors[j] == *d) {
                unique.push(i);
            }
        }
        let mut hits = vec![0usize; self.descriptors.len()];

        let candidates = self.candidates();
        let mut ambiguous: HashSet<(usize, usize)> = HashSet::new();

        // Descriptor and annotation matches
        for c in &candidates {
            let unit = &self.units[c.unit_index];
            let matched: Vec<usize> = unique
                .iter()
                .copied()
                .filter(|&i| self.descriptor_matches(&self.descriptors[i], unit, c))
                .collect();
            for &i in &matched {
                hits[i] += 1;
            }

            let origin = match matched.as_slice() {
                [] => {
                    if self.is_annotated(unit, c.method_index) {
                        MatchOrigin::Annotation
                    } else {
                        continue;
                    }
                }
                [i] => MatchOrigin::Descriptor(*i),
                _ => {
                    ambiguous.insert((c.unit_index, c.method_index));
                    errors.push(WeaveError::AmbiguousTarget {
                        method: format!("{}.{}{}", unit.name.replace('/', "."), c.method.name, c.logical),
                        descriptors: matched.iter().map(|&i| self.descriptors[i].to_string()).collect(),
                    });
                    continue;
                }
            };
            let target = self.make_target(&mut interner, c, origin);
            targets.insert(target.key, target);
        }

        // Methods related by overriding change signature together, both down to
        // subtypes and up to the supertype methods a target overrides, so a call
        // through any of them still dispatches to a woven method
        loop {
            let mut found = Vec::new();
            for c in &candidates {
                if c.method.is_static()
                    || c.method.is_private()
                    || ambiguous.contains(&(c.unit_index, c.method_index))
                {
                    continue;
                }
                let unit = &self.units[c.unit_index];
                if existing_key(&interner, &unit.name, &c.method.name, &c.logical)
                    .is_some_and(|k| targets.contains_key(&k))
                {
                    continue;
                }
                if self.overrides_target(&hierarchy, &interner, &targets, unit, c)
                    || self.overridden_by_target(&hierarchy, &interner, &targets, unit, c)
                {
                    found.push(c);
                }
            }
            if found.is_empty() {
                break;
            }
            for c in found {
                let target = self.make_target(&mut interner, c, MatchOrigin::Override);
                tracing::debug!(unit = %target.unit, method = %c.method.name, "method related by overriding becomes a target");
                targets.insert(target.key, target);
            }
        }
        let families = families(&hierarchy, &interner, &targets);

        for &i in &unique {
            if hits[i] == 0 {
                tracing::warn!(descriptor = %self.descriptors[i], "target descriptor matches no method");
                warnings.push(WeaveError::UnresolvedDescriptor {
                    descriptor: self.descriptors[i].to_string(),
                });
            }
        }

        let blocked_units = self.collisions(&targets);

        let mut by_unit: HashMap<String, Vec<MethodKey>> = HashMap::new();
        let mut ordered: Vec<&ResolvedTarget> = targets.values().collect();
        ordered.sort_by_key(|t| t.method_index);
        for t in ordered {
            by_unit.entry(t.unit.clone()).or_default().push(t.key);
        }

        tracing::info!(
            targets = targets.len(),
            ambiguous = errors.len(),
            blocked_units = blocked_units.len(),
            "resolved targets"
        );

        let mut resolution = Resolution {
            interner,
            hierarchy,
            targets,
            families,
            by_unit,
            blocked_units,
            warnings,
            errors,
        };
        for (unit, err) in self.handle_references(&resolution) {
            tracing::warn!(unit = %unit, error = %err, "target referenced by a method handle");
            resolution.blocked_units.entry(unit).or_insert(err);
        }
        resolution
    }

    /// Units whose targets are named by a `MethodHandle` constant
    ///
    /// A handle links against the pre-weave descriptor and cannot carry the
    /// metadata argument, so the declaring unit must stay unmodified.
    fn handle_references(&self, resolution: &Resolution) -> Vec<(String, WeaveError)> {
        let mut out: Vec<(String, WeaveError)> = Vec::new();
        for holder in self.units {
            for (_, member) in holder.class.constant_pool.method_handles() {
                if member.owner.starts_with('[') {
                    continue;
                }
                let Some(target) = resolution.resolve_invocation(member.owner, member.name, member.descriptor) else {
                    continue;
                };
                if !target.needs_signature_edit() || out.iter().any(|(unit, _)| *unit == target.unit) {
                    continue;
                }
                let Some(unit) = self.units.iter().find(|u| u.path == target.unit) else {
                    continue;
                };
                out.push((
                    target.unit.clone(),
                    WeaveError::Unsupported {
                        unit: target.unit.clone(),
                        method: unit.methods[target.method_index].display_name(),
                        reason: format!("method is referenced by a method handle in {}", holder.path),
                    },
                ));
            }
        }
        out
    }

    fn candidates(&self) -> Vec<Candidate<'a>> {
        let mut out = Vec::new();
        for (unit_index, unit) in self.units.iter().enumerate() {
            for (method_index, method) in unit.methods.iter().enumerate() {
                if method.is_excluded() {
                    continue;
                }
                let (logical, already_woven) = self.logical_descriptor(method);
                let parsed = match MethodDescriptor::parse(&logical) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::debug!(unit = %unit.path, method = %method.name, error = %e, "skipping method with bad descriptor");
                        continue;
                    }
                };
                out.push(Candidate {
                    unit_index,
                    method_index,
                    method,
                    logical,
                    parsed,
                    already_woven,
                });
            }
        }
        out
    }

    /// Pre-weave descriptor of a method and whether it is already woven
    fn logical_descriptor(&self, method: &MethodInfo) -> (String, bool) {
        if let Some(original) = &method.woven_from {
            let consistent = MethodDescriptor::parse(&method.descriptor)
                .ok()
                .filter(|d| d.params.last() == Some(&self.metadata_type))
                .and_then(|d| d.without_last())
                .map(|d| d.to_string() == *original)
                .unwrap_or(false);
            if consistent {
                return (original.clone(), true);
            }
            tracing::warn!(method = %method.display_name(), "ignoring inconsistent weave marker");
        }
        (method.descriptor.clone(), false)
    }

    fn descriptor_matches(&self, d: &TargetDescriptor, unit: &CompilationUnit, c: &Candidate<'_>) -> bool {
        if d.method() != c.method.name || d.params().len() != c.parsed.params.len() {
            return false;
        }
        if !unit.language.owner_matches(d.owner(), &unit.name) {
            return false;
        }
        params_match(unit.language, d.params(), &c.parsed)
    }

    fn is_annotated(&self, unit: &CompilationUnit, method_index: usize) -> bool {
        let Some(marker) = &self.options.marker_annotation else {
            return false;
        };
        let descriptor = FieldType::object(marker.clone()).to_string();
        let member = &unit.class.methods[method_index];
        match has_annotation(&member.attributes, &unit.class.constant_pool, &descriptor) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(unit = %unit.path, error = %e, "unreadable annotations");
                false
            }
        }
    }

    /// Whether `c` overrides a virtual target declared in a supertype
    fn overrides_target(
        &self,
        hierarchy: &ClassHierarchy,
        interner: &Interner,
        targets: &HashMap<MethodKey, ResolvedTarget>,
        unit: &CompilationUnit,
        c: &Candidate<'_>,
    ) -> bool {
        hierarchy.ancestors(&unit.name).into_iter().any(|ancestor| {
            existing_key(interner, ancestor, &c.method.name, &c.logical)
                .and_then(|k| targets.get(&k))
                .is_some_and(|t| !t.is_static && !self.is_private_target(hierarchy, ancestor, t))
        })
    }

    /// Whether a virtual target declared in a subtype overrides `c`
    fn overridden_by_target(
        &self,
        hierarchy: &ClassHierarchy,
        interner: &Interner,
        targets: &HashMap<MethodKey, ResolvedTarget>,
        unit: &CompilationUnit,
        c: &Candidate<'_>,
    ) -> bool {
        let (Some(name), Some(descriptor)) = (interner.get(&c.method.name), interner.get(&c.logical)) else {
            return false;
        };
        targets.values().any(|t| {
            let owner = interner.resolve(t.key.owner);
            t.key.name == name
                && t.key.descriptor == descriptor
                && !t.is_static
                && owner != unit.name
                && hierarchy.is_subtype(owner, &unit.name)
                && !self.is_private_target(hierarchy, owner, t)
        })
    }

    fn is_private_target(&self, hierarchy: &ClassHierarchy, class: &str, target: &ResolvedTarget) -> bool {
        hierarchy
            .unit_of(class)
            .and_then(|u| self.units[u].methods.get(target.method_index))
            .is_some_and(MethodInfo::is_private)
    }

    fn make_target(&self, interner: &mut Interner, c: &Candidate<'_>, origin: MatchOrigin) -> ResolvedTarget {
        let unit = &self.units[c.unit_index];
        let key = MethodKey::new(interner, &unit.name, &c.method.name, &c.logical);
        let woven_descriptor = c.parsed.with_appended(self.metadata_type.clone()).to_string();
        // Named after the matched class, however the descriptor spelled its owner
        let target_name = format!("{}.{}", unit.simple_name(), c.method.name);
        ResolvedTarget {
            key,
            unit: unit.path.clone(),
            method_index: c.method_index,
            original_descriptor: c.logical.clone(),
            woven_descriptor,
            target_name,
            origin,
            is_static: c.method.is_static(),
            already_woven: c.already_woven,
        }
    }

    /// Units where an appended parameter would clash with an existing overload
    fn collisions(&self, targets: &HashMap<MethodKey, ResolvedTarget>) -> BTreeMap<String, WeaveError> {
        let by_path: HashMap<&str, &CompilationUnit> =
            self.units.iter().map(|u| (u.path.as_str(), u)).collect();
        let mut ordered: Vec<&ResolvedTarget> = targets.values().filter(|t| !t.already_woven).collect();
        ordered.sort_by(|a, b| (&a.unit, a.method_index).cmp(&(&b.unit, b.method_index)));

        let mut blocked = BTreeMap::new();
        for t in ordered {
            let Some(unit) = by_path.get(t.unit.as_str()) else {
                continue;
            };
            let name = &unit.methods[t.method_index].name;
            if unit.find_method(name, &t.woven_descriptor).is_some() && !blocked.contains_key(&t.unit) {
                let err = WeaveError::SignatureCollision {
                    unit: t.unit.clone(),
                    method: format!("{}{}", name, t.original_descriptor),
                    descriptor: format!("{}{}", name, t.woven_descriptor),
                };
                tracing::warn!(unit = %t.unit, error = %err, "signature collision");
                blocked.insert(t.unit.clone(), err);
            }
        }
        blocked
    }
}

/// Groups of virtual targets related by overriding, keyed by each member
///
/// Members share name and descriptor and one owner is a subtype of the other;
/// the relation is closed transitively.
fn families(
    hierarchy: &ClassHierarchy,
    interner: &Interner,
    targets: &HashMap<MethodKey, ResolvedTarget>,
) -> HashMap<MethodKey, Vec<MethodKey>> {
    let mut keys: Vec<MethodKey> = targets.values().filter(|t| !t.is_static).map(|t| t.key).collect();
    keys.sort();

    let mut parent: Vec<usize> = (0..keys.len()).collect();
    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }
    for i in 0..keys.len() {
        for j in i + 1..keys.len() {
            let (a, b) = (keys[i], keys[j]);
            if a.name != b.name || a.descriptor != b.descriptor {
                continue;
            }
            let (owner_a, owner_b) = (interner.resolve(a.owner), interner.resolve(b.owner));
            if hierarchy.is_subtype(owner_a, owner_b) || hierarchy.is_subtype(owner_b, owner_a) {
                let (ra, rb) = (root(&mut parent, i), root(&mut parent, j));
                parent[ra] = rb;
            }
        }
    }

    let mut groups: HashMap<usize, Vec<MethodKey>> = HashMap::new();
    for i in 0..keys.len() {
        let r = root(&mut parent, i);
        groups.entry(r).or_default().push(keys[i]);
    }
    let mut out = HashMap::new();
    for members in groups.into_values().filter(|m| m.len() > 1) {
        for key in &members {
            out.insert(*key, members.clone());
        }
    }
    out
}

/// Key of an already interned method, without interning
fn existing_key(interner: &Interner, owner: &str, name: &str, descriptor: &str) -> Option<MethodKey> {
    Some(MethodKey {
        owner: interner.get(owner)?,
        name: interner.get(name)?,
        descriptor: interner.get(descriptor)?,
    })
}

/// Whether descriptor parameter spellings match a compiled parameter list
pub(crate) fn params_match(language: SourceLanguage, params: &[String], descriptor: &MethodDescriptor) -> bool {
    params.len() == descriptor.params.len()
        && params
            .iter()
            .zip(&descriptor.params)
            .all(|(raw, ty)| language.type_pattern(raw).matches(ty))
}
