use std::fs;

use tempfile::tempdir;

mod common;

use common::{layr, parse_json, read_archive, stderr};

#[test]
fn layer_command_writes_archive_and_summary() {
    let temp = tempdir().expect("tempdir");
    let tool = temp.path().join("tool");
    fs::write(&tool, b"#!/bin/sh\necho hi\n").expect("write tool");
    let entries = temp.path().join("entries.json");
    fs::write(
        &entries,
        format!(
            r#"{{
                "/usr/bin/tool": {{"type": "file", "source": "{}", "mode": "0755"}},
                "/etc/motd": {{"type": "file", "text": "hello\n"}},
                "/bin": {{"type": "link", "target": "usr/bin"}},
                "/var/empty": {{"type": "directory", "mode": "u=rwx,go="}}
            }}"#,
            tool.display()
        ),
    )
    .expect("write entries");
    let out = temp.path().join("layer/layer.tar");

    let assert = layr()
        .args(["layer", "--entries"])
        .arg(&entries)
        .arg("--out")
        .arg(&out)
        .args(["--mtime", "86400"])
        .assert()
        .success();
    let summary = parse_json(&assert);
    assert_eq!(summary["entries"], 9);
    assert_eq!(summary["size"], fs::metadata(&out).expect("archive").len());
    assert!(summary["digest"]
        .as_str()
        .is_some_and(|digest| digest.starts_with("sha256:")));

    let archived = read_archive(&out);
    let names: Vec<_> = archived.iter().map(|entry| entry.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            ".",
            "./bin",
            "./etc",
            "./etc/motd",
            "./usr",
            "./usr/bin",
            "./usr/bin/tool",
            "./var",
            "./var/empty",
        ]
    );
    assert!(archived.iter().all(|entry| entry.mtime == 86_400));
    let tool_entry = archived
        .iter()
        .find(|entry| entry.name == "./usr/bin/tool")
        .expect("tool entry");
    assert_eq!(tool_entry.mode, 0o755);
    assert_eq!(tool_entry.data, b"#!/bin/sh\necho hi\n");
    let empty = archived
        .iter()
        .find(|entry| entry.name == "./var/empty")
        .expect("empty dir");
    assert_eq!(empty.mode, 0o700);
}

#[test]
fn layer_builds_are_reproducible() {
    let temp = tempdir().expect("tempdir");
    let tree = temp.path().join("tree");
    fs::create_dir_all(tree.join("lib")).expect("tree");
    fs::write(tree.join("lib/a.so"), b"a").expect("a");
    fs::write(tree.join("README"), b"readme").expect("readme");
    let entries = temp.path().join("entries.json");
    fs::write(
        &entries,
        format!(
            r#"{{"/opt/app": {{"type": "directory", "sources": [{{"path": "{}", "uid": 1000}}]}}}}"#,
            tree.display()
        ),
    )
    .expect("write entries");

    let mut digests = Vec::new();
    for name in ["one.tar", "two.tar"] {
        let out = temp.path().join(name);
        let assert = layr()
            .args(["layer", "--entries"])
            .arg(&entries)
            .arg("--out")
            .arg(&out)
            .env("SOURCE_DATE_EPOCH", "1700000000")
            .assert()
            .success();
        digests.push(parse_json(&assert)["digest"].clone());
    }
    assert_eq!(digests[0], digests[1]);
    assert_eq!(
        fs::read(temp.path().join("one.tar")).expect("one"),
        fs::read(temp.path().join("two.tar")).expect("two")
    );
    assert!(read_archive(&temp.path().join("one.tar"))
        .iter()
        .all(|entry| entry.mtime == 1_700_000_000));
}

#[test]
fn includes_are_added_after_entries() {
    let temp = tempdir().expect("tempdir");
    let pkg = temp.path().join("pkg");
    fs::create_dir_all(&pkg).expect("pkg");
    fs::write(pkg.join("data"), b"data").expect("data");
    let skipped = temp.path().join("skipped");
    let includes = temp.path().join("includes");
    fs::write(
        &includes,
        format!("{}\n{}\n", pkg.display(), skipped.display()),
    )
    .expect("includes");
    let excludes = temp.path().join("excludes");
    fs::write(&excludes, format!("{}\n", skipped.display())).expect("excludes");
    let out = temp.path().join("layer.tar");

    layr()
        .arg("layer")
        .arg("--includes")
        .arg(&includes)
        .arg("--excludes")
        .arg(&excludes)
        .arg("--out")
        .arg(&out)
        .assert()
        .success();

    let expected = format!(".{}/data", pkg.display());
    assert!(
        read_archive(&out).iter().any(|entry| entry.name == expected),
        "missing {expected}"
    );
}

#[test]
fn empty_layers_write_nothing() {
    let temp = tempdir().expect("tempdir");
    let entries = temp.path().join("entries.json");
    fs::write(&entries, "{}").expect("entries");
    let out = temp.path().join("layer.tar");

    let assert = layr()
        .args(["layer", "--entries"])
        .arg(&entries)
        .arg("--out")
        .arg(&out)
        .assert()
        .success();
    assert!(parse_json(&assert).is_null());
    assert!(!out.exists());
}

#[test]
fn ambiguous_numeric_modes_fail_the_build() {
    let temp = tempdir().expect("tempdir");
    let entries = temp.path().join("entries.json");
    fs::write(
        &entries,
        r#"{"/etc/motd": {"type": "file", "text": "x", "mode": "644"}}"#,
    )
    .expect("entries");
    let out = temp.path().join("layer.tar");

    let assert = layr()
        .args(["layer", "--entries"])
        .arg(&entries)
        .arg("--out")
        .arg(&out)
        .assert()
        .failure();
    assert!(stderr(&assert).contains("[LY102]"), "{}", stderr(&assert));
    assert!(!out.exists());
}

#[test]
fn invalid_umask_is_rejected() {
    let temp = tempdir().expect("tempdir");
    let assert = layr()
        .args(["layer", "--umask", "22", "--out"])
        .arg(temp.path().join("layer.tar"))
        .assert()
        .failure();
    assert!(stderr(&assert).contains("[LY103]"), "{}", stderr(&assert));
}

#[test]
fn repeated_builds_extend_one_archive() {
    let temp = tempdir().expect("tempdir");
    let out = temp.path().join("layer.tar");
    let runs = [
        ("first.json", r#"{"/first": {"type": "file", "text": "one"}}"#),
        (
            "second.json",
            r#"{"/first": {"type": "file", "text": "late"}, "/second": {"type": "file", "text": "two"}}"#,
        ),
    ];
    for (name, document) in runs {
        let entries = temp.path().join(name);
        fs::write(&entries, document).expect("write entries");
        layr()
            .args(["layer", "--entries"])
            .arg(&entries)
            .arg("--out")
            .arg(&out)
            .assert()
            .success();
    }

    let archived = read_archive(&out);
    let names: Vec<_> = archived.iter().map(|entry| entry.name.as_str()).collect();
    assert_eq!(names, vec![".", "./first", "./second"]);
    assert_eq!(archived[1].data, b"one");
}

#[test]
fn non_tar_outputs_are_rejected() {
    let temp = tempdir().expect("tempdir");
    let entries = temp.path().join("entries.json");
    fs::write(&entries, r#"{"/etc/motd": {"type": "file", "text": "x"}}"#).expect("entries");
    let out = temp.path().join("layer.tar");
    fs::write(&out, "plain text").expect("out");

    let assert = layr()
        .args(["layer", "--entries"])
        .arg(&entries)
        .arg("--out")
        .arg(&out)
        .assert()
        .failure();
    assert!(stderr(&assert).contains("[LY303]"), "{}", stderr(&assert));
    assert_eq!(fs::read_to_string(&out).expect("out"), "plain text");
}
