use anyhow::{anyhow, Result};

use crate::model::{
    Configuration, GlobalPSet, Id, InputTag, Instance, InstanceKind, ModuleType, Parameter,
    ParameterSet, ParameterValue, Path, Reference, ReleaseCatalog, Sequence, Stream, Template,
    TemplateKind,
};
use crate::store::rows::ReleaseRow;
use crate::store::MemoryStore;

pub const DEMO_RELEASE: &str = "CMSSW_2_1_0";

fn int32(value: i32) -> ParameterValue {
    ParameterValue::Int32 { value: Some(value), hex: false }
}

fn string(value: &str) -> ParameterValue {
    ParameterValue::String(Some(value.to_string()))
}

fn strings(values: &[&str]) -> ParameterValue {
    ParameterValue::VString(values.iter().map(|v| v.to_string()).collect())
}

/// Registers a small release with one template of every kind and a mix of
/// parameter types, including nested sets and hex-flagged integers.
pub fn seed_demo_release(store: &MemoryStore) -> Result<ReleaseRow> {
    let release = store.add_release(DEMO_RELEASE);
    let io = store.add_subsystem("IOPool");
    let input = store.add_package(io.id, "Input");
    let output = store.add_package(io.id, "Output");
    let conditions = store.add_subsystem("CondCore");
    let db_source = store.add_package(conditions.id, "DBSource");
    let magnetic = store.add_subsystem("MagneticField");
    let engine = store.add_package(magnetic.id, "Engine");
    let framework = store.add_subsystem("FWCore");
    let services = store.add_package(framework.id, "MessageService");
    let hlt = store.add_subsystem("HLTrigger");
    let hlt_core = store.add_package(hlt.id, "HLTcore");
    let hlt_l1 = store.add_package(hlt.id, "HLTfilters");
    let tracking = store.add_subsystem("RecoTracker");
    let ckf = store.add_package(tracking.id, "CkfPattern");

    store.add_template(
        release.id,
        input.id,
        TemplateKind::EDSource,
        "PoolSource",
        "V05-00-00",
        vec![
            Parameter::tracked("fileNames", strings(&["file:input.root"])),
            Parameter::untracked("maxEvents", int32(-1)),
        ],
    )?;
    store.add_template(
        release.id,
        db_source.id,
        TemplateKind::ESSource,
        "GlobalTag",
        "V02-01-00",
        vec![
            Parameter::tracked("globaltag", string("IDEAL_V9::All")),
            Parameter::untracked("connect", string("frontier://FrontierProd/CMS_COND_21X")),
        ],
    )?;
    store.add_template(
        release.id,
        engine.id,
        TemplateKind::ESModule,
        "VolumeBasedMagneticFieldESProducer",
        "V03-00-02",
        vec![
            Parameter::tracked("version", string("grid_1103l_071212_4t")),
            Parameter::untracked("debugBuilder", ParameterValue::Bool(Some(false))),
        ],
    )?;
    store.add_template(
        release.id,
        services.id,
        TemplateKind::Service,
        "MessageLogger",
        "V02-04-00",
        vec![
            Parameter::untracked("destinations", strings(&["cout", "warnings"])),
            Parameter::untracked("threshold", ParameterValue::String(None)),
        ],
    )?;
    store.add_template(
        release.id,
        hlt_core.id,
        TemplateKind::Module(ModuleType::HLTFilter),
        "HLTPrescaler",
        "V01-08-00",
        vec![Parameter::tracked(
            "prescaleFactor",
            ParameterValue::UInt32 { value: Some(1), hex: false },
        )],
    )?;
    store.add_template(
        release.id,
        hlt_l1.id,
        TemplateKind::Module(ModuleType::HLTFilter),
        "HLTLevel1GTSeed",
        "V01-06-03",
        vec![
            Parameter::tracked("L1SeedsLogicalExpression", string("L1_SingleMu7")),
            Parameter::tracked(
                "L1GtReadoutRecordTag",
                ParameterValue::InputTag(Some(InputTag::new("gtDigis"))),
            ),
            Parameter::tracked("L1TechTriggerSeeding", ParameterValue::Bool(Some(false))),
        ],
    )?;
    store.add_template(
        release.id,
        ckf.id,
        TemplateKind::Module(ModuleType::EDProducer),
        "CkfTrackCandidateMaker",
        "V02-11-00",
        vec![
            Parameter::tracked("src", ParameterValue::InputTag(Some(InputTag::new("globalMixedSeeds")))),
            Parameter::tracked(
                "TrajectoryBuilder",
                ParameterValue::PSet(vec![
                    Parameter::tracked("ComponentName", string("GroupedCkfTrajectoryBuilder")),
                    Parameter::tracked("maxCand", int32(5)),
                    Parameter::tracked("lostHitPenalty", ParameterValue::Double(Some(30.0))),
                ]),
            ),
            Parameter::tracked(
                "seedCuts",
                ParameterValue::VPSet(vec![
                    ParameterSet::new("", true, vec![Parameter::tracked("ptMin", ParameterValue::Double(Some(0.9)))]),
                    ParameterSet::new("", true, vec![Parameter::tracked("ptMin", ParameterValue::Double(Some(1.5)))]),
                ]),
            ),
            Parameter::tracked("mask", ParameterValue::Int32 { value: Some(0xff), hex: true }),
        ],
    )?;
    store.add_template(
        release.id,
        output.id,
        TemplateKind::Module(ModuleType::OutputModule),
        "PoolOutputModule",
        "V04-01-00",
        vec![
            Parameter::untracked("fileName", string("output.root")),
            Parameter::untracked("outputCommands", strings(&["keep *"])),
        ],
    )?;

    log::info!("Seeded demo release {}", DEMO_RELEASE);
    Ok(release)
}

fn template<'r>(release: &'r ReleaseCatalog, name: &str) -> Result<&'r Template> {
    release
        .find_template(name)
        .ok_or_else(|| anyhow!("template {} is not part of release {}", name, release.tag))
}

/// The demo graph `MyConfig`: three modules on path `P`, one of them via
/// sequence `S`, an output module on end path `E` and stream `A` over `E`.
pub fn demo_configuration(release: &ReleaseCatalog, directory_id: Id) -> Result<Configuration> {
    let mut config = Configuration::new(directory_id, "MyConfig", release.tag.clone());

    config.psets.push(GlobalPSet::new(ParameterSet::new(
        "options",
        false,
        vec![Parameter::untracked("wantSummary", ParameterValue::Bool(Some(true)))],
    )));
    config
        .edsources
        .push(Instance::from_template(template(release, "PoolSource")?, ""));

    let mut global_tag = Instance::from_template(template(release, "GlobalTag")?, "GlobalTag");
    global_tag.kind = InstanceKind::ESSource { preferred: true };
    config.essources.push(global_tag);
    config.esmodules.push(Instance::from_template(
        template(release, "VolumeBasedMagneticFieldESProducer")?,
        "magfield",
    ));
    config
        .services
        .push(Instance::from_template(template(release, "MessageLogger")?, ""));

    let mut a = Instance::from_template(template(release, "HLTPrescaler")?, "a");
    a.set_parameter("prescaleFactor", ParameterValue::UInt32 { value: Some(10), hex: false });
    config.modules.push(a);
    config
        .modules
        .push(Instance::from_template(template(release, "CkfTrackCandidateMaker")?, "b"));
    config
        .modules
        .push(Instance::from_template(template(release, "HLTLevel1GTSeed")?, "c"));
    config
        .modules
        .push(Instance::from_template(template(release, "PoolOutputModule")?, "out"));

    config
        .sequences
        .push(Sequence::new("S", vec![Reference::Module("c".into())]));
    config.paths.push(Path::new(
        "P",
        vec![
            Reference::Module("a".into()),
            Reference::Sequence("S".into()),
            Reference::Module("b".into()),
        ],
    ));
    config
        .paths
        .push(Path::end_path("E", vec![Reference::Module("out".into())]));
    config.streams.push(Stream::new("A", vec!["E".into()]));

    Ok(config)
}
