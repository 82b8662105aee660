//! Shared fixtures for the pass tests

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use lumos::classfile::access::{ACC_PUBLIC, ACC_STATIC};
use lumos::classfile::opcode::*;
use lumos::classfile::{decode, ClassBuilder, ClassFile, CodeBuilder, MethodBuilder};
use lumos::model::DEFAULT_METADATA_CLASS;
use lumos::Config;

/// Metadata arguments pushed before one woven call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pushed {
    pub file_path: String,
    pub file_name: String,
    pub line: i32,
    pub target: String,
}

/// Write a built class under `root`, returning its relative path
pub fn write_class(root: &Path, builder: ClassBuilder) -> String {
    let class = builder.build_class().expect("class failed to build");
    let relative = format!("{}.class", class.this_class_name().expect("no class name"));
    let path = root.join(&relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, class.to_bytes()).unwrap();
    relative
}

pub fn read(root: &Path, relative: &str) -> Vec<u8> {
    fs::read(root.join(relative)).expect("class file missing")
}

pub fn config(targets: &[&str]) -> Config {
    let mut config = Config::default();
    config.add_targets(targets).expect("bad target");
    config
}

/// `public static void targetMethodInJava(int)` in `com.example.JavaExample`
pub fn java_example() -> ClassBuilder {
    ClassBuilder::new("com/example/JavaExample")
        .source_file("JavaExample.java")
        .method(
            MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "targetMethodInJava", "(I)V")
                .code(CodeBuilder::new(0, 1).line(3).op(RETURN))
                .parameter_names(&["value"]),
        )
}

/// `com.example.<name>.main()` calling the Java example target on `line`
pub fn caller(name: &str, line: u16) -> ClassBuilder {
    let body = CodeBuilder::new(1, 0)
        .line(line)
        .push_int(9)
        .member(INVOKESTATIC, "com/example/JavaExample", "targetMethodInJava", "(I)V")
        .line(line + 1)
        .op(RETURN);
    ClassBuilder::new(format!("com/example/{name}"))
        .source_file(format!("{name}.java"))
        .method(MethodBuilder::new(ACC_PUBLIC | ACC_STATIC, "main", "()V").code(body))
}

/// Metadata pushed for every woven call in `method`
pub fn pushed_metadata(bytes: &[u8], method: &str, descriptor: &str) -> Vec<Pushed> {
    let class = ClassFile::parse(bytes).expect("woven class does not parse");
    let pool = &class.constant_pool;
    let index = class.find_method(method, descriptor).expect("method missing");
    let code = class.methods[index].code(pool).unwrap().expect("method has no code");
    let ins = decode(&code.code).unwrap();

    let string = |i: usize| pool.string(ins[i].constant_index().unwrap()).unwrap().to_string();
    let mut found = Vec::new();
    for (i, new) in ins.iter().enumerate() {
        if new.opcode != NEW {
            continue;
        }
        if pool.class_name(new.constant_index().unwrap()).unwrap() != DEFAULT_METADATA_CLASS {
            continue;
        }
        assert_eq!(ins[i + 1].opcode, DUP);
        found.push(Pushed {
            file_path: string(i + 2),
            file_name: string(i + 3),
            line: ins[i + 4].int_value(pool).expect("line is not an int constant"),
            target: string(i + 5),
        });
    }
    found
}
