//! # aos-payload — Embedded Payload Loader
//!
//! Lets a single binary carry its own program: the packager appends a
//! marker plus canonical tree text after the native executable image, and
//! the binary probes itself at startup. Scanning runs from the end of the
//! file; when both markers are present the one at the later offset is the
//! active payload, so payloads can be layered without ambiguity.

use aos_tree::{AttrValue, HostError, Tree, kinds};
use tracing::{debug, instrument};

/// Marker preceding an AST-bundle payload (`--AOS-BUNDLE-PAYLOAD--`).
///
/// Assembled at runtime from parts: a whole-marker literal would land in the
/// scanner's own `.rodata`, and the self-scan would then find that reference
/// copy inside every clean binary and never reach normal CLI mode.
pub fn bundle_marker() -> Vec<u8> {
    marker("BUNDLE")
}

/// Marker preceding a bytecode payload (`--AOS-BYTECODE-PAYLOAD--`).
pub fn bytecode_marker() -> Vec<u8> {
    marker("BYTECODE")
}

fn marker(tag: &str) -> Vec<u8> {
    format!("--AOS-{tag}-PAYLOAD--").into_bytes()
}

/// A payload recovered from the host executable.
#[derive(Debug, Clone)]
pub enum Payload {
    /// An AST bundle, already expanded into the driver program that imports
    /// its entry file and calls its entry export.
    Bundle { bundle: Tree, driver: Tree },
    /// A bytecode tree, handed to the VM's `main` entry without a kernel.
    Bytecode(Tree),
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&offset| &haystack[offset..offset + needle.len()] == needle)
}

fn payload_text(bytes: &[u8], marker_offset: usize, marker: &[u8]) -> String {
    String::from_utf8_lossy(&bytes[marker_offset + marker.len()..]).into_owned()
}

/// Builds the driver program for a bundle: import the entry file, then call
/// the entry export; its value stands as the user program's result.
fn synthesize_driver(entry_file: &str, entry_export: &str) -> Tree {
    Tree::new(kinds::PROGRAM)
        .with_id("bundle")
        .with_attr("name", AttrValue::Str("bundle".to_owned()))
        .with_child(Tree::new("Import").with_str("file", entry_file))
        .with_child(Tree::new("Call").with_str("fn", entry_export))
}

fn classify_bundle(text: &str) -> Result<Payload, HostError> {
    let outcome = aos_wire::parse(text);
    if let Some(diag) = outcome.diagnostics.first() {
        return Err(HostError::new(
            "BND001",
            format!("bundle payload unparseable: {}", diag.message),
        ));
    }
    let bundle = outcome
        .root
        .filter(|root| root.is_kind(kinds::BUNDLE))
        .ok_or_else(|| HostError::new("BND001", "bundle payload is not a Bundle tree"))?;

    let entry_file = bundle
        .attr_str("entryFile")
        .ok_or_else(|| HostError::new("BND002", "bundle payload missing entryFile"))?;
    let entry_export = bundle
        .attr_str("entryExport")
        .ok_or_else(|| HostError::new("BND002", "bundle payload missing entryExport"))?;

    let driver = synthesize_driver(entry_file, entry_export);
    debug!(entry_file, entry_export, "bundle payload accepted");
    Ok(Payload::Bundle { driver, bundle })
}

fn classify_bytecode(text: &str) -> Result<Payload, HostError> {
    let outcome = aos_wire::parse(text);
    if let Some(diag) = outcome.diagnostics.first() {
        return Err(HostError::new(
            "BND003",
            format!("bytecode payload unparseable: {}", diag.message),
        ));
    }
    let bytecode = outcome
        .root
        .filter(|root| root.is_kind(kinds::BYTECODE))
        .ok_or_else(|| HostError::new("BND003", "bytecode payload is not a Bytecode tree"))?;
    debug!("bytecode payload accepted");
    Ok(Payload::Bytecode(bytecode))
}

/// Scans an executable image for an embedded payload. `Ok(None)` means no
/// marker is present (normal CLI mode); a present but malformed payload is
/// an error, never a silent fallback.
#[instrument(skip(bytes), fields(len = bytes.len()))]
pub fn probe(bytes: &[u8]) -> Result<Option<Payload>, HostError> {
    let bundle = bundle_marker();
    let bytecode = bytecode_marker();
    let bundle_at = rfind(bytes, &bundle);
    let bytecode_at = rfind(bytes, &bytecode);

    match (bundle_at, bytecode_at) {
        (None, None) => Ok(None),
        (Some(offset), None) => classify_bundle(&payload_text(bytes, offset, &bundle)).map(Some),
        (None, Some(offset)) => {
            classify_bytecode(&payload_text(bytes, offset, &bytecode)).map(Some)
        }
        (Some(bundle_offset), Some(bytecode_offset)) => {
            // Appended later = active; the trailing payload wins.
            if bytecode_offset > bundle_offset {
                classify_bytecode(&payload_text(bytes, bytecode_offset, &bytecode)).map(Some)
            } else {
                classify_bundle(&payload_text(bytes, bundle_offset, &bundle)).map(Some)
            }
        }
    }
}

/// Probes the running binary itself.
pub fn probe_current_exe() -> Result<Option<Payload>, HostError> {
    let exe = std::env::current_exe()
        .map_err(|err| HostError::new("BND001", format!("cannot locate own executable: {err}")))?;
    let bytes = std::fs::read(&exe).map_err(|err| {
        HostError::new(
            "BND001",
            format!("cannot read own executable {}: {err}", exe.display()),
        )
    })?;
    probe(&bytes)
}
