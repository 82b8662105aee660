//! End-to-end weaving scenarios over a directory of class files

mod common;

use std::fs;

use lumos::classfile::access::{ACC_PUBLIC, ACC_STATIC};
use lumos::classfile::opcode::*;
use lumos::classfile::{decode, ClassBuilder, ClassFile, CodeBuilder, MethodBuilder, Operand};
use lumos::model::{UnitOutcome, UnitState};
use tempfile::TempDir;

use common::*;

const WOVEN: &str = "(ILcom/lumos/runtime/Lumen;)V";

#[test]
fn call_at_foo_java_42_gets_its_coordinates() {
    let dir = TempDir::new().unwrap();
    let classes = dir.path().join("classes");
    let sources = dir.path().join("src");
    fs::create_dir_all(sources.join("com/example")).unwrap();
    fs::write(sources.join("com/example/Foo.java"), "class Foo {}\n").unwrap();

    let target = write_class(&classes, java_example());
    let foo = write_class(&classes, caller("Foo", 42));

    let mut config = config(&["com.example.JavaExample.targetMethodInJava(int)"]);
    config.source_roots.push(sources.clone());
    let report = lumos::run(config, &classes).expect("pass failed");
    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(report.targets, 1);
    assert_eq!(report.unit(&foo).unwrap().state, UnitState::Verified);
    assert_eq!(
        report.unit(&foo).unwrap().outcome,
        UnitOutcome::Verified {
            signatures: 0,
            call_sites: 1,
            deferred: 0
        }
    );

    let pushed = pushed_metadata(&read(&classes, &foo), "main", "()V");
    assert_eq!(pushed.len(), 1);
    let expected_path = fs::canonicalize(sources.join("com/example/Foo.java")).unwrap();
    assert_eq!(pushed[0].file_path, expected_path.display().to_string());
    assert_eq!(pushed[0].file_name, "Foo.java");
    assert_eq!(pushed[0].line, 42);
    assert_eq!(pushed[0].target, "JavaExample.targetMethodInJava");

    let target = ClassFile::parse(&read(&classes, &target)).unwrap();
    assert!(target.find_method("targetMethodInJava", WOVEN).is_some());
    assert!(target.find_method("targetMethodInJava", "(I)V").is_none());
}

#[test]
fn unresolved_descriptor_warns_and_pass_succeeds() {
    let dir = TempDir::new().unwrap();
    let target = write_class(dir.path(), java_example());
    let before = read(dir.path(), &target);

    let report = lumos::run(config(&["com.example.Nope.missing()"]), dir.path()).expect("pass failed");

    assert!(report.is_success());
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].code, "E-WEAVE-001");
    assert_eq!(report.targets, 0);
    assert_eq!(report.written, 0);
    assert_eq!(read(dir.path(), &target), before);
}

#[test]
fn call_sites_in_different_files_get_their_own_coordinates() {
    let dir = TempDir::new().unwrap();
    write_class(dir.path(), java_example());
    let first = write_class(dir.path(), caller("First", 10));
    let second = write_class(dir.path(), caller("Second", 20));

    let report = lumos::run(config(&["JavaExample.targetMethodInJava(int)"]), dir.path()).expect("pass failed");
    assert!(report.is_success(), "{}", report.summary());
    assert_eq!(report.modified(), 3);

    let first = pushed_metadata(&read(dir.path(), &first), "main", "()V");
    let second = pushed_metadata(&read(dir.path(), &second), "main", "()V");
    assert_eq!(
        first,
        [Pushed {
            file_path: "com/example/First.java".into(),
            file_name: "First.java".into(),
            line: 10,
            target: "JavaExample.targetMethodInJava".into(),
        }]
    );
    assert_eq!(second[0].file_name, "Second.java");
    assert_eq!(second[0].file_path, "com/example/Second.java");
    assert_eq!(second[0].line, 20);
}

#[test]
fn branches_around_woven_call_keep_their_targets() {
    // static void main(int flag) { if (flag != 0) targetMethodInJava(1); }
    let body = CodeBuilder::new(1, 1)
        .line(7)
        .local(ILOAD, 0)
        .jump(IFEQ, 1)
        .push_int(1)
        .member(INVOKESTATIC, "com/example/JavaExample", "targetMethodInJava", "(I)V")
        .label(1)
        .line(8)
        .op(RETURN);
    let dir = TempDir::new().unwrap();
    write_class(dir.path(), java_example());
    let branchy = write_class(
        dir.path(),
        ClassBuilder::new("com/example/Branchy")
            .source_file("Branchy.java")
            .method(MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "main", "(I)V").code(body)),
    );

    let report = lumos::run(config(&["JavaExample.targetMethodInJava(int)"]), dir.path()).expect("pass failed");
    assert!(report.is_success(), "{}", report.summary());

    let class = ClassFile::parse(&read(dir.path(), &branchy)).unwrap();
    let index = class.find_method("main", "(I)V").unwrap();
    let code = class.methods[index].code(&class.constant_pool).unwrap().unwrap();
    let ins = decode(&code.code).unwrap();
    let target = match ins[1].operand {
        Operand::Branch { target } => target,
        ref other => panic!("expected a branch, got {other:?}"),
    };
    let landing = ins.iter().find(|i| i.label == Some(target)).expect("branch target is not an instruction");
    assert_eq!(landing.opcode, RETURN);
    assert_eq!(ins.last().unwrap().label, Some(target));

    let lines = code.line_numbers(&class.constant_pool).unwrap().unwrap();
    assert_eq!(lines.line_for_pc(target), Some(8));
}
