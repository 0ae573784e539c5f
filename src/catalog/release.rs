use std::collections::HashMap;

use crate::codec::{DecodeMode, ParameterIndex};
use crate::error::{ConfDbError, ConsistencyWarning, Loaded, Result, WarningSink};
use crate::model::{
    Id, ModuleType, ReleaseCatalog, SoftwarePackage, SoftwareSubsystem, Template, TemplateKind,
    TypeRegistry,
};
use crate::store::rows::{ReleaseRow, StagedTemplates, TemplateRow, TemplateRowKind};
use crate::store::Store;

/// Loads release catalogs and single templates through the staging step.
pub struct TemplateCatalog<'a, S: ?Sized> {
    store: &'a S,
    registry: &'a TypeRegistry,
}

impl<'a, S: Store + ?Sized> TemplateCatalog<'a, S> {
    pub fn new(store: &'a S, registry: &'a TypeRegistry) -> Self {
        Self { store, registry }
    }

    /// All release tags, sorted.
    pub async fn list_release_tags(&self) -> Result<Vec<String>> {
        let mut tags: Vec<String> = self
            .store
            .list_releases()
            .await
            .map_err(ConfDbError::store("list release tags"))?
            .into_iter()
            .map(|r| r.tag)
            .collect();
        tags.sort();
        Ok(tags)
    }

    async fn release_row(&self, operation: &'static str, tag: &str) -> Result<ReleaseRow> {
        self.store
            .release_by_tag(tag)
            .await
            .map_err(ConfDbError::store(operation))?
            .ok_or_else(|| ConfDbError::not_found(operation, format!("release '{}'", tag)))
    }

    /// Full catalog of a release.
    pub async fn load_release(&self, tag: &str) -> Result<Loaded<ReleaseCatalog>> {
        const OP: &str = "load release";
        let release = self.release_row(OP, tag).await?;
        let staged = self
            .store
            .stage_release(release.id)
            .await
            .map_err(ConfDbError::store(OP))?;
        let loaded = build_catalog(self.registry, &release, &staged, false)?;
        log::info!(
            "Loaded release {} with {} templates",
            release.tag,
            loaded.value.template_count()
        );
        Ok(loaded)
    }

    pub async fn load_release_by_id(&self, release_id: Id) -> Result<Loaded<ReleaseCatalog>> {
        const OP: &str = "load release";
        let release = self
            .store
            .release_by_id(release_id)
            .await
            .map_err(ConfDbError::store(OP))?
            .ok_or_else(|| ConfDbError::not_found(OP, format!("release {}", release_id)))?;
        self.load_release(&release.tag).await
    }

    /// Catalog restricted to the templates a configuration references.
    pub async fn load_partial_release(&self, configuration_id: Id) -> Result<Loaded<ReleaseCatalog>> {
        const OP: &str = "load partial release";
        let config = self
            .store
            .get_configuration(configuration_id)
            .await
            .map_err(ConfDbError::store(OP))?
            .ok_or_else(|| ConfDbError::not_found(OP, format!("configuration {}", configuration_id)))?;
        let release = self
            .store
            .release_by_id(config.release_id)
            .await
            .map_err(ConfDbError::store(OP))?
            .ok_or_else(|| {
                ConfDbError::integrity(
                    OP,
                    format!(
                        "configuration {} refers to unknown release {}",
                        configuration_id, config.release_id
                    ),
                )
            })?;
        let staged = self
            .store
            .stage_configuration_templates(configuration_id)
            .await
            .map_err(ConfDbError::store(OP))?;
        let loaded = build_catalog(self.registry, &release, &staged, true)?;
        log::debug!(
            "Loaded {} templates of release {} for configuration {}",
            loaded.value.template_count(),
            release.tag,
            configuration_id
        );
        Ok(loaded)
    }

    /// Point lookup of a template by name within a release.
    pub async fn load_template(&self, tag: &str, name: &str) -> Result<Loaded<Template>> {
        const OP: &str = "load template";
        let release = self.release_row(OP, tag).await?;
        let staged = self
            .store
            .stage_template(release.id, name)
            .await
            .map_err(ConfDbError::store(OP))?;
        let Loaded { value, warnings } = build_catalog(self.registry, &release, &staged, true)?;
        let template = value
            .find_template(name)
            .cloned()
            .ok_or_else(|| ConfDbError::not_found(OP, format!("template '{}' in release '{}'", name, tag)))?;
        Ok(Loaded::new(template, warnings))
    }
}

fn template_kind(registry: &TypeRegistry, row: &TemplateRow) -> Result<TemplateKind> {
    Ok(match row.kind {
        TemplateRowKind::EDSource => TemplateKind::EDSource,
        TemplateRowKind::ESSource => TemplateKind::ESSource,
        TemplateRowKind::ESModule => TemplateKind::ESModule,
        TemplateRowKind::Service => TemplateKind::Service,
        TemplateRowKind::Module => {
            let module_type: Option<ModuleType> = row.type_id.and_then(|id| registry.module_type(id));
            TemplateKind::Module(module_type.ok_or_else(|| {
                ConfDbError::integrity(
                    "build catalog",
                    format!("module template '{}' has unknown type {:?}", row.name, row.type_id),
                )
            })?)
        }
    })
}

/// Groups staged template rows into subsystems and packages.
///
/// A package only appears once it holds a template and a subsystem only
/// once it holds a package. Everything is sorted by name.
pub fn build_catalog(
    registry: &TypeRegistry,
    release: &ReleaseRow,
    staged: &StagedTemplates,
    partial: bool,
) -> Result<Loaded<ReleaseCatalog>> {
    const OP: &str = "build catalog";
    let mut sink = WarningSink::default();
    let index = ParameterIndex::new(registry, &staged.parameters, &staged.values);

    let mut by_package: HashMap<Id, Vec<Template>> = HashMap::new();
    for row in &staged.templates {
        let decoded = index.unflatten(row.id, DecodeMode::Lenient)?;
        if decoded.missing > 0 {
            sink.push(ConsistencyWarning::MissingParameters {
                owner: format!("template '{}' ({})", row.name, row.cvs_tag),
                count: decoded.missing,
            });
        }
        let template = Template {
            id: row.id,
            kind: template_kind(registry, row)?,
            name: row.name.clone(),
            cvs_tag: row.cvs_tag.clone(),
            parameters: decoded.parameters,
        };
        by_package.entry(row.package_id).or_default().push(template);
    }

    let mut by_subsystem: HashMap<Id, Vec<SoftwarePackage>> = HashMap::new();
    for package in &staged.packages {
        let Some(mut templates) = by_package.remove(&package.id) else {
            continue;
        };
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        by_subsystem
            .entry(package.subsystem_id)
            .or_default()
            .push(SoftwarePackage {
                id: package.id,
                name: package.name.clone(),
                templates,
            });
    }
    if let Some(orphan) = by_package.values().flatten().next() {
        return Err(ConfDbError::integrity(
            OP,
            format!("template '{}' belongs to an unknown package", orphan.name),
        ));
    }

    let mut subsystems = Vec::new();
    for subsystem in &staged.subsystems {
        let Some(mut packages) = by_subsystem.remove(&subsystem.id) else {
            continue;
        };
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        subsystems.push(SoftwareSubsystem {
            id: subsystem.id,
            name: subsystem.name.clone(),
            packages,
        });
    }
    if let Some(package) = by_subsystem.values().flatten().next() {
        return Err(ConfDbError::integrity(
            OP,
            format!("package '{}' belongs to an unknown subsystem", package.name),
        ));
    }
    subsystems.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(sink.finish(ReleaseCatalog::new(release.id, release.tag.clone(), partial, subsystems)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Parameter, ParameterValue};
    use crate::store::MemoryStore;

    fn seeded() -> (MemoryStore, ReleaseRow) {
        let store = MemoryStore::new();
        let release = store.add_release("CMSSW_2_0_0");
        let hlt = store.add_subsystem("HLTrigger");
        let reco = store.add_subsystem("RecoTracker");
        let empty = store.add_subsystem("Empty");
        let filters = store.add_package(hlt.id, "HLTcore");
        let tracks = store.add_package(reco.id, "TrackProducer");
        store.add_package(empty.id, "Unused");
        store
            .add_template(
                release.id,
                filters.id,
                TemplateKind::Module(ModuleType::HLTFilter),
                "HLTPrescaler",
                "V01-00",
                vec![Parameter::tracked("prescale", ParameterValue::UInt32 { value: Some(1), hex: false })],
            )
            .unwrap();
        store
            .add_template(release.id, filters.id, TemplateKind::Service, "Timing", "V00-01", vec![])
            .unwrap();
        store
            .add_template(
                release.id,
                tracks.id,
                TemplateKind::Module(ModuleType::EDProducer),
                "CkfTrackProducer",
                "V02-03",
                vec![],
            )
            .unwrap();
        (store, release)
    }

    #[tokio::test]
    async fn packages_without_templates_are_omitted_and_sorted() {
        let (store, _) = seeded();
        let registry = TypeRegistry::standard();
        let catalog = TemplateCatalog::new(&store, &registry);
        let loaded = catalog.load_release("CMSSW_2_0_0").await.unwrap();
        let release = loaded.value;

        let names: Vec<&str> = release.subsystems.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["HLTrigger", "RecoTracker"]);
        let hlt_templates: Vec<&str> = release.subsystems[0].packages[0]
            .templates
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(hlt_templates, vec!["HLTPrescaler", "Timing"]);
        assert_eq!(release.template_count(), 3);
        assert!(loaded.warnings.is_empty());
    }

    #[tokio::test]
    async fn single_template_lookup() {
        let (store, _) = seeded();
        let registry = TypeRegistry::standard();
        let catalog = TemplateCatalog::new(&store, &registry);

        let template = catalog.load_template("CMSSW_2_0_0", "HLTPrescaler").await.unwrap().value;
        assert_eq!(template.kind, TemplateKind::Module(ModuleType::HLTFilter));
        assert_eq!(template.parameters.len(), 1);

        let err = catalog.load_template("CMSSW_2_0_0", "Nope").await.unwrap_err();
        assert!(matches!(err, ConfDbError::NotFound { .. }));
        let err = catalog.load_release("CMSSW_9_9_9").await.unwrap_err();
        assert!(matches!(err, ConfDbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn incomplete_template_parameters_produce_warning() {
        let (store, release) = seeded();
        let registry = TypeRegistry::standard();
        let packages = store.add_subsystem("Calib");
        let package = store.add_package(packages.id, "Calib");
        let template = store
            .add_template(
                release.id,
                package.id,
                TemplateKind::ESSource,
                "CalibSource",
                "V1",
                vec![
                    Parameter::tracked("a", ParameterValue::Bool(Some(true))),
                    Parameter::tracked("b", ParameterValue::Bool(Some(false))),
                    Parameter::tracked("c", ParameterValue::Bool(Some(true))),
                ],
            )
            .unwrap();
        let b = store.parameter_id(template.id, "b").unwrap();
        assert!(store.remove_parameter_placement(b));

        let catalog = TemplateCatalog::new(&store, &registry);
        let loaded = catalog.load_release("CMSSW_2_0_0").await.unwrap();
        let calib = loaded.value.find_template("CalibSource").unwrap();
        assert_eq!(calib.parameters.len(), 2);
        assert_eq!(
            loaded.warnings,
            vec![ConsistencyWarning::MissingParameters {
                owner: "template 'CalibSource' (V1)".into(),
                count: 1
            }]
        );
    }
}
