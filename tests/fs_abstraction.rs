use std::collections::BTreeMap;
use std::path::Path;

use taskgraph::cache::cache_key;
use taskgraph::exec::ExecutionRequest;
use taskgraph::fs::{FileSystem, MockFileSystem};
use taskgraph::types::FileHandle;

#[test]
fn test_file_handle_hash() {
    let handle = FileHandle::from_bytes("hello world");
    // blake3 hash of "hello world"
    assert_eq!(
        handle.hash(),
        "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
    );
    assert_eq!(handle.len(), 11);
}

#[test]
fn test_mock_fs_files_and_dirs() {
    let fs = MockFileSystem::new();
    fs.add_file("/project/src/main.c", "int main() {}");

    assert!(fs.is_file(Path::new("/project/src/main.c")));
    assert!(fs.exists(Path::new("/project/src")));
    assert!(!fs.is_file(Path::new("/project/src")));
    assert!(fs.read(Path::new("/project/src")).is_err());
    assert!(fs.read(Path::new("/project/missing.c")).is_err());

    fs.write(Path::new("/project/out/bin/a.out"), b"elf").unwrap();
    assert!(fs.exists(Path::new("/project/out/bin")));
    assert_eq!(fs.contents("/project/out/bin/a.out"), Some(b"elf".to_vec()));
    assert!(fs.create_dir_all(Path::new("/project/src/main.c")).is_err());
}

fn request(args: &[&str], stdin: Option<&str>, inputs: &[(&str, &str)]) -> ExecutionRequest {
    ExecutionRequest {
        program: "cc".to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        stdin: stdin.map(FileHandle::from_bytes),
        inputs: inputs
            .iter()
            .map(|(name, content)| (name.to_string(), FileHandle::from_bytes(*content)))
            .collect::<BTreeMap<_, _>>(),
        outputs: vec!["a.out".to_string()],
        ..Default::default()
    }
}

#[test]
fn test_cache_key_tracks_content_not_identity() {
    let base = cache_key(&request(&["-O2"], None, &[("main.c", "int main() {}")]));

    // Same content, rebuilt from scratch: same key.
    assert_eq!(base, cache_key(&request(&["-O2"], None, &[("main.c", "int main() {}")])));

    assert_ne!(base, cache_key(&request(&["-O0"], None, &[("main.c", "int main() {}")])));
    assert_ne!(base, cache_key(&request(&["-O2"], None, &[("main.c", "int main() { return 1; }")])));
    assert_ne!(base, cache_key(&request(&["-O2"], None, &[("other.c", "int main() {}")])));
    assert_ne!(base, cache_key(&request(&["-O2"], Some(""), &[("main.c", "int main() {}")])));
    // Argument boundaries matter.
    assert_ne!(
        cache_key(&request(&["-O", "2"], None, &[])),
        cache_key(&request(&["-O2"], None, &[]))
    );
}

#[test]
fn test_cache_key_tracks_executable_content() {
    let with_program = |content: Option<&str>| ExecutionRequest {
        program: "solution".to_string(),
        executable: content.map(FileHandle::from_bytes),
        ..Default::default()
    };
    let compiled = cache_key(&with_program(Some("#!/bin/sh\necho 1\n")));

    assert_ne!(compiled, cache_key(&with_program(None)));
    assert_ne!(compiled, cache_key(&with_program(Some("#!/bin/sh\necho 2\n"))));
    assert_eq!(compiled, cache_key(&with_program(Some("#!/bin/sh\necho 1\n"))));

    // Exclusivity changes scheduling, not the result.
    let mut exclusive = with_program(None);
    exclusive.exclusive = true;
    assert_eq!(cache_key(&exclusive), cache_key(&with_program(None)));
}
