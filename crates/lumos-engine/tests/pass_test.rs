//! Tests for the weaving pass over a directory of class files

use std::fs;
use std::path::Path;

use lumos_classfile::access::{ACC_ABSTRACT, ACC_INTERFACE, ACC_PUBLIC, ACC_STATIC};
use lumos_classfile::opcode::*;
use lumos_classfile::{ClassBuilder, ClassFile, CodeBuilder, MethodBuilder};
use lumos_engine::{Config, Engine, EngineError};
use lumos_model::{UnitOutcome, UnitState};
use tempfile::TempDir;

fn write_class(root: &Path, builder: ClassBuilder) -> String {
    let class = builder.build_class().expect("class failed to build");
    let relative = format!("{}.class", class.this_class_name().expect("no class name"));
    let path = root.join(&relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, class.to_bytes()).unwrap();
    relative
}

/// `static void f(int a) { long x = 0L; }` with `x` reusing slot 0, which
/// cannot take the metadata parameter
fn wide_target() -> ClassBuilder {
    let body = CodeBuilder::new(2, 2).line(1).op(0x09).local(LSTORE, 0).op(RETURN);
    ClassBuilder::new("com/example/Wide")
        .source_file("Wide.java")
        .method(MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "f", "(I)V").code(body))
}

fn simple_target() -> ClassBuilder {
    ClassBuilder::new("com/example/JavaExample")
        .source_file("JavaExample.java")
        .method(
            MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "targetMethodInJava", "(I)V")
                .code(CodeBuilder::new(0, 1).line(3).op(RETURN)),
        )
}

fn caller(name: &str, owner: &str, method: &str) -> ClassBuilder {
    let body = CodeBuilder::new(1, 1)
        .line(5)
        .push_int(1)
        .member(INVOKESTATIC, owner, method, "(I)V")
        .op(RETURN);
    ClassBuilder::new(format!("com/example/{name}"))
        .source_file(format!("{name}.java"))
        .method(MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "main", "()V").code(body))
}

fn api() -> ClassBuilder {
    ClassBuilder::new("com/example/Api")
        .access(ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT)
        .source_file("Api.java")
        .method(MethodBuilder::new(ACC_PUBLIC | ACC_ABSTRACT, "call", "(I)V"))
}

fn api_impl(extra: Option<&str>) -> ClassBuilder {
    let mut builder = ClassBuilder::new("com/example/Impl")
        .interface("com/example/Api")
        .source_file("Impl.java")
        .method(MethodBuilder::new(ACC_PUBLIC, "call", "(I)V").code(CodeBuilder::new(0, 2).line(8).op(RETURN)));
    if let Some(descriptor) = extra {
        builder = builder
            .method(MethodBuilder::new(ACC_PUBLIC, "call", descriptor).code(CodeBuilder::new(0, 3).line(9).op(RETURN)));
    }
    builder
}

/// `static void use(Api api) { api.call(1); }`
fn api_client() -> ClassBuilder {
    let body = CodeBuilder::new(2, 1)
        .line(12)
        .local(ALOAD, 0)
        .push_int(1)
        .member(INVOKEINTERFACE, "com/example/Api", "call", "(I)V")
        .op(RETURN);
    ClassBuilder::new("com/example/Client")
        .source_file("Client.java")
        .method(MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "use", "(Lcom/example/Api;)V").code(body))
}

fn parse(root: &Path, relative: &str) -> ClassFile {
    ClassFile::parse(&fs::read(root.join(relative)).unwrap()).unwrap()
}

fn config(targets: &[&str]) -> Config {
    let mut config = Config::default();
    config.add_targets(targets).expect("bad target");
    config
}

#[test]
fn failed_target_unit_defers_its_callers() {
    let dir = TempDir::new().unwrap();
    let wide = write_class(dir.path(), wide_target());
    let user = write_class(dir.path(), caller("User", "com/example/Wide", "f"));
    let before = fs::read(dir.path().join(&user)).unwrap();

    let report = lumos_engine::run(config(&["Wide.f(int)"]), dir.path()).expect("pass failed");

    let wide = report.unit(&wide).expect("wide unit reported");
    assert_eq!(wide.state, UnitState::RewriteFailed);
    assert!(matches!(&wide.outcome, UnitOutcome::RewriteFailed { code, .. } if code == "E-WEAVE-007"));

    let user_report = report.unit(&user).expect("caller reported");
    assert_eq!(
        user_report.outcome,
        UnitOutcome::Verified {
            signatures: 0,
            call_sites: 0,
            deferred: 1
        }
    );
    assert_eq!(user_report.deferred.len(), 1);
    assert_eq!(user_report.deferred[0].line, 5);
    assert_eq!(fs::read(dir.path().join(&user)).unwrap(), before);
    assert!(!report.is_success());
    assert_eq!(report.written, 0);
}

#[test]
fn aborted_pass_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let target = write_class(dir.path(), simple_target());
    let before = fs::read(dir.path().join(&target)).unwrap();

    let engine = Engine::new(config(&["JavaExample.targetMethodInJava(int)"])).unwrap();
    engine.abort_flag().abort();
    let report = engine.run(dir.path()).expect("pass failed");

    assert!(report.aborted);
    assert!(!report.is_success());
    assert_eq!(report.written, 0);
    let unit = report.unit(&target).unwrap();
    assert!(matches!(&unit.outcome, UnitOutcome::RewriteFailed { code, .. } if code == "E-WEAVE-008"));
    assert_eq!(fs::read(dir.path().join(&target)).unwrap(), before);
}

#[test]
fn output_directory_mirrors_input_and_gets_runtime() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let target = write_class(input.path(), simple_target());
    let user = write_class(input.path(), caller("User", "com/example/JavaExample", "targetMethodInJava"));
    let idle = write_class(
        input.path(),
        ClassBuilder::new("com/example/Idle").source_file("Idle.java"),
    );
    fs::write(input.path().join("app.properties"), "name=demo\n").unwrap();
    let before = fs::read(input.path().join(&target)).unwrap();

    let mut config = config(&["JavaExample.targetMethodInJava(int)"]);
    config.output = Some(output.path().to_path_buf());
    config.emit_runtime = true;
    let report = lumos_engine::run(config, input.path()).expect("pass failed");

    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(report.modified(), 2);
    assert_eq!(report.written, 4);
    assert_eq!(fs::read(input.path().join(&target)).unwrap(), before);
    assert_ne!(fs::read(output.path().join(&target)).unwrap(), before);
    assert!(output.path().join(&user).is_file());
    assert_eq!(
        fs::read(output.path().join(&idle)).unwrap(),
        fs::read(input.path().join(&idle)).unwrap()
    );
    assert_eq!(fs::read_to_string(output.path().join("app.properties")).unwrap(), "name=demo\n");
    assert!(output.path().join("com/lumos/runtime/Lumen.class").is_file());
    assert!(output.path().join("com/lumos/runtime/LumosMaxima.class").is_file());
}

#[test]
fn survey_lists_targets_and_sites_without_writing() {
    let dir = TempDir::new().unwrap();
    let target = write_class(dir.path(), simple_target());
    write_class(dir.path(), caller("User", "com/example/JavaExample", "targetMethodInJava"));
    let before = fs::read(dir.path().join(&target)).unwrap();

    let engine = Engine::new(config(&["JavaExample.targetMethodInJava(int)", "Missing.call()"])).unwrap();
    let survey = engine.survey(dir.path()).expect("survey failed");

    assert_eq!(survey.targets.len(), 1);
    assert_eq!(survey.targets[0].method, "targetMethodInJava");
    assert_eq!(survey.targets[0].woven_descriptor, "(ILcom/lumos/runtime/Lumen;)V");
    assert_eq!(survey.call_sites.len(), 1);
    assert_eq!(survey.call_sites[0].line, 5);
    assert_eq!(survey.call_sites[0].target, "JavaExample.targetMethodInJava");
    assert_eq!(survey.warnings.len(), 1);
    assert_eq!(survey.warnings[0].code, "E-WEAVE-001");
    assert_eq!(fs::read(dir.path().join(&target)).unwrap(), before);
}

#[test]
fn missing_input_is_an_error() {
    let dir = TempDir::new().unwrap();
    let err = lumos_engine::run(Config::default(), &dir.path().join("absent")).unwrap_err();
    assert!(matches!(err, EngineError::InputNotFound(_)));
    assert_eq!(err.code(), "E-ENGINE-002");
}

#[test]
fn implementation_target_weaves_the_interface_it_implements() {
    let dir = TempDir::new().unwrap();
    let api = write_class(dir.path(), api());
    let imp = write_class(dir.path(), api_impl(None));
    let client = write_class(dir.path(), api_client());

    let report = lumos_engine::run(config(&["com.example.Impl.call(int)"]), dir.path()).expect("pass failed");
    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(report.targets, 2);

    let woven = "(ILcom/lumos/runtime/Lumen;)V";
    let api = parse(dir.path(), &api);
    assert!(api.find_method("call", woven).is_some());
    assert!(api.find_method("call", "(I)V").is_none());
    let imp = parse(dir.path(), &imp);
    assert!(imp.find_method("call", woven).is_some());
    assert!(imp.find_method("call", "(I)V").is_none());

    assert_eq!(
        report.unit(&client).unwrap().outcome,
        UnitOutcome::Verified {
            signatures: 0,
            call_sites: 1,
            deferred: 0
        }
    );
}

#[test]
fn collision_in_one_implementation_keeps_the_family_unwoven() {
    let dir = TempDir::new().unwrap();
    let api = write_class(dir.path(), api());
    let imp = write_class(dir.path(), api_impl(Some("(ILcom/lumos/runtime/Lumen;)V")));
    let client = write_class(dir.path(), api_client());
    let before: Vec<Vec<u8>> = [&api, &imp, &client]
        .iter()
        .map(|p| fs::read(dir.path().join(p)).unwrap())
        .collect();

    let report = lumos_engine::run(config(&["com.example.Api.call(int)"]), dir.path()).expect("pass failed");

    assert_eq!(report.unit(&imp).unwrap().state, UnitState::RewriteFailed);
    assert_eq!(
        report.unit(&api).unwrap().outcome,
        UnitOutcome::Verified {
            signatures: 0,
            call_sites: 0,
            deferred: 0
        }
    );
    assert_eq!(
        report.unit(&client).unwrap().outcome,
        UnitOutcome::Verified {
            signatures: 0,
            call_sites: 0,
            deferred: 1
        }
    );
    let after: Vec<Vec<u8>> = [&api, &imp, &client]
        .iter()
        .map(|p| fs::read(dir.path().join(p)).unwrap())
        .collect();
    assert_eq!(after, before);
}

#[test]
fn method_handle_to_target_leaves_target_and_callers_unwoven() {
    let dir = TempDir::new().unwrap();
    let target = write_class(dir.path(), simple_target());

    let mut holder = caller("Holder", "com/example/JavaExample", "targetMethodInJava")
        .build_class()
        .unwrap();
    let pool = &mut holder.constant_pool;
    let reference = pool
        .method_ref_index("com/example/JavaExample", "targetMethodInJava", "(I)V", false)
        .unwrap();
    pool.method_handle_index(lumos_classfile::constant_pool::REF_INVOKE_STATIC, reference)
        .unwrap();
    let holder_path = "com/example/Holder.class";
    fs::write(dir.path().join(holder_path), holder.to_bytes()).unwrap();
    let before = (
        fs::read(dir.path().join(&target)).unwrap(),
        fs::read(dir.path().join(holder_path)).unwrap(),
    );

    let report = lumos_engine::run(config(&["JavaExample.targetMethodInJava(int)"]), dir.path()).expect("pass failed");

    assert!(!report.is_success());
    let target_report = report.unit(&target).unwrap();
    assert_eq!(target_report.state, UnitState::RewriteFailed);
    assert!(matches!(&target_report.outcome, UnitOutcome::RewriteFailed { code, .. } if code == "E-WEAVE-007"));
    assert_eq!(
        report.unit(holder_path).unwrap().outcome,
        UnitOutcome::Verified {
            signatures: 0,
            call_sites: 0,
            deferred: 1
        }
    );
    assert_eq!(report.written, 0);
    let after = (
        fs::read(dir.path().join(&target)).unwrap(),
        fs::read(dir.path().join(holder_path)).unwrap(),
    );
    assert_eq!(after, before);
}
