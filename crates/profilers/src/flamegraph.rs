use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use inferno::collapse::perf::Folder;
use inferno::collapse::Collapse;
use inferno::flamegraph::{self, Options};

use crate::ProfilerError;

/// Folds `perf script` stacks and writes the flame graph SVG to `svg_path`.
pub fn render_flame_graph(perf_script: &str, svg_path: &Path) -> Result<(), ProfilerError> {
    let mut folded = Vec::new();
    Folder::default()
        .collapse(perf_script.as_bytes(), &mut folded)
        .map_err(|e| ProfilerError::FlameGraph(e.to_string()))?;
    if folded.is_empty() {
        return Err(ProfilerError::FlameGraph("no stacks to plot".to_string()));
    }

    let svg = File::create(svg_path).map_err(|source| ProfilerError::Io {
        path: svg_path.to_path_buf(),
        source,
    })?;
    let mut options = Options::default();
    options.title = "lpprof".to_string();
    flamegraph::from_reader(&mut options, folded.as_slice(), BufWriter::new(svg))
        .map_err(|e| ProfilerError::FlameGraph(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERF_SCRIPT: &str = "\
solver 4242 100.000001: 10101010 cycles:
\t          401136 compute (/home/user/solver)
\t          401200 main (/home/user/solver)
\t    7f2a3b429d90 __libc_start_main (/usr/lib/x86_64-linux-gnu/libc.so.6)

solver 4242 100.000002: 10101010 cycles:
\t          401200 main (/home/user/solver)
\t    7f2a3b429d90 __libc_start_main (/usr/lib/x86_64-linux-gnu/libc.so.6)

";

    #[test]
    fn test_render_flame_graph() {
        let dir = tempfile::tempdir().unwrap();
        let svg = dir.path().join("flames_0.svg");

        render_flame_graph(PERF_SCRIPT, &svg).unwrap();

        let contents = std::fs::read_to_string(&svg).unwrap();
        assert!(contents.contains("<svg"));
        assert!(contents.contains("compute"));
    }

    #[test]
    fn test_empty_script_has_nothing_to_plot() {
        let dir = tempfile::tempdir().unwrap();
        let svg = dir.path().join("flames_0.svg");

        let err = render_flame_graph("", &svg).unwrap_err();
        assert!(matches!(err, ProfilerError::FlameGraph(_)));
        assert!(!svg.exists());
    }
}
