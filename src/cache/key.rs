// src/cache/key.rs

use blake3::Hasher;

use crate::exec::ExecutionRequest;

/// Compute the cache key of an execution request.
///
/// The key covers everything that can influence the result: program and
/// its content when it comes from the graph, arguments, stdin content, input
/// contents by name, and the set of declared outputs. Inputs and outputs are hashed in sorted order so the key does not
/// depend on declaration order.
pub fn cache_key(request: &ExecutionRequest) -> String {
    let mut hasher = Hasher::new();

    field(&mut hasher, "program", request.program.as_bytes());
    if let Some(executable) = &request.executable {
        field(&mut hasher, "executable", executable.hash().as_bytes());
    }
    for arg in &request.args {
        field(&mut hasher, "arg", arg.as_bytes());
    }

    match &request.stdin {
        Some(stdin) => field(&mut hasher, "stdin", stdin.hash().as_bytes()),
        None => field(&mut hasher, "stdin", b""),
    }

    // BTreeMap iteration is already sorted by name.
    for (name, handle) in &request.inputs {
        field(&mut hasher, "input", name.as_bytes());
        field(&mut hasher, "input-hash", handle.hash().as_bytes());
    }

    let mut outputs: Vec<&String> = request.outputs.iter().collect();
    outputs.sort();
    for output in outputs {
        field(&mut hasher, "output", output.as_bytes());
    }

    hasher.finalize().to_hex().to_string()
}

/// Length-prefixed field so that adjacent values cannot run into each other.
fn field(hasher: &mut Hasher, tag: &str, value: &[u8]) {
    hasher.update(tag.as_bytes());
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value);
}
