use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use covgate::lcov::LcovCli;
use tempfile::TempDir;

/// Shell stand-in for `lcov` that recognizes the argument shapes the
/// pipeline uses (merge, summary, list) and answers with canned output.
const FAKE_LCOV: &str = r#"#!/bin/sh
mode=""
out=""
prev=""
for arg in "$@"; do
    if [ "$prev" = "--output-file" ]; then
        out="$arg"
    fi
    case "$arg" in
        --add-tracefile) mode=merge ;;
        --summary) mode=summary ;;
        --list) mode=list ;;
    esac
    prev="$arg"
done
case "$mode" in
merge)
    echo "merged tracefile" > "$out"
    echo "Combining tracefiles."
    ;;
summary)
    echo "Reading tracefile merged.info"
    echo "Summary coverage rate:"
    echo "  lines......: 82.5% (33 of 40 lines)"
    echo "  functions..: 100.0% (4 of 4 functions)"
    ;;
list)
    echo "Reading tracefile merged.info"
    echo "            |Lines       |Functions  |Branches"
    echo "Filename    |Rate     Num|Rate    Num|Rate     Num"
    echo "=================================================="
    echo "src/lib.rs  |94.4%     18|100%      4|    -      0"
    echo "src/main.rs |40.0%     10|50.0%     2|    -      0"
    echo "=================================================="
    echo "      Total:|82.5%     28|83.3%     6|    -      0"
    ;;
esac
"#;

/// Stand-in for `genhtml` that writes an index page into the requested
/// output directory.
const FAKE_GENHTML: &str = r#"#!/bin/sh
out=""
prev=""
for arg in "$@"; do
    if [ "$prev" = "--output-directory" ]; then
        out="$arg"
    fi
    prev="$arg"
done
mkdir -p "$out"
echo "<html></html>" > "$out/index.html"
echo "Overall coverage rate:"
"#;

const FAILING_TOOL: &str = r#"#!/bin/sh
echo "ERROR: cannot read tracefile" >&2
exit 1
"#;

/// Install fake `lcov`/`genhtml` scripts in a fresh temp dir. The caller
/// must hold onto `TempDir` to keep the scripts alive.
pub fn fake_tools() -> (LcovCli, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let lcov = write_script(dir.path(), "lcov", FAKE_LCOV);
    let genhtml = write_script(dir.path(), "genhtml", FAKE_GENHTML);
    (LcovCli::with_binaries(lcov, genhtml), dir)
}

/// Tools that exit non-zero on every invocation.
pub fn failing_tools() -> (LcovCli, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let lcov = write_script(dir.path(), "lcov", FAILING_TOOL);
    let genhtml = write_script(dir.path(), "genhtml", FAILING_TOOL);
    (LcovCli::with_binaries(lcov, genhtml), dir)
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}
