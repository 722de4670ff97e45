//! CLI flag parsing, input resolution, and top-level orchestration: read
//! each input file, drive it through `builder::lang::Parser`, freeze and
//! order the resulting `InstructionSet`, then hand it to `codegen`. The
//! concrete ISA-description grammar is out of scope; `builder::lang` is
//! the stand-in parse-tree visitor this module drives.
use std::path::{Path, PathBuf};

use log::info;

use crate::builder::lang::Parser;
use crate::builder::IrBuilder;
use crate::codegen;

pub struct Driver {
    pub output_dir: PathBuf,
    pub prefix: String,
    pub isa_name: Option<String>,
    pub include_dirs: Vec<PathBuf>,
    pub input_files: Vec<String>,
    pub verbose: bool,
}

impl Driver {
    pub fn new() -> Self {
        Self {
            output_dir: PathBuf::from("./"),
            prefix: String::new(),
            isa_name: None,
            include_dirs: Vec::new(),
            input_files: Vec::new(),
            verbose: false,
        }
    }

    /// Resolve `name` against each include root in order, falling back to
    /// the bare name relative to the process's working directory.
    fn resolve_input(&self, name: &str) -> PathBuf {
        let bare = Path::new(name);
        if bare.is_absolute() || bare.exists() {
            return bare.to_path_buf();
        }
        for root in &self.include_dirs {
            let candidate = root.join(name);
            if candidate.exists() {
                return candidate;
            }
        }
        bare.to_path_buf()
    }

    fn load_and_parse(&self, builder: &mut IrBuilder, path: &Path) -> Result<(), String> {
        let text = std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        let file_id = builder.source_manager.add_file(path.display().to_string(), text.clone());
        builder.begin_include(file_id).map_err(|e| e.to_string())?;
        let mut parser = Parser::new(builder, &text, file_id);
        parser.parse_program().map_err(|e| e.to_string())?;
        builder.end_include();
        Ok(())
    }

    pub fn run(&self) -> Result<(), String> {
        if self.prefix.is_empty() {
            return Err("--prefix is required and must be non-empty".to_string());
        }
        if self.input_files.is_empty() {
            return Err("no input files".to_string());
        }

        let mut builder = IrBuilder::new();
        for input in &self.input_files {
            let resolved = self.resolve_input(input);
            self.load_and_parse(&mut builder, &resolved)?;
        }

        if builder.diagnostics.has_errors() {
            builder.diagnostics.print_all(&builder.source_manager);
            return Err(format!("{} error(s) during ingest", builder.diagnostics.error_count()));
        }

        let iset = builder
            .instruction_set
            .as_mut()
            .ok_or_else(|| "no ISA declared in input".to_string())?;
        if let Some(name) = &self.isa_name {
            if &iset.name != name {
                return Err(format!("--isa_name {name} does not match declared ISA {}", iset.name));
            }
        }

        iset.compute_slot_and_bundle_orders();
        info!("computed slot order ({} slots)", iset.slot_order.len());
        iset.analyze_resource_use().map_err(|e| e.to_string())?;
        iset.freeze();

        let emitted = codegen::emit(iset, &self.prefix).map_err(|e| e.to_string())?;

        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| format!("cannot create {}: {e}", self.output_dir.display()))?;
        let header_path = self.output_dir.join(format!("{}_decoder.h", self.prefix));
        let source_path = self.output_dir.join(format!("{}_decoder.cc", self.prefix));
        std::fs::write(&header_path, emitted.header).map_err(|e| e.to_string())?;
        std::fs::write(&source_path, emitted.source).map_err(|e| e.to_string())?;
        info!("wrote {} and {}", header_path.display(), source_path.display());
        Ok(())
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_rejects_empty_prefix() {
        let mut driver = Driver::new();
        driver.input_files.push("a.isa".to_string());
        let err = driver.run().unwrap_err();
        assert!(err.contains("--prefix"));
    }

    #[test]
    fn run_rejects_no_input_files() {
        let mut driver = Driver::new();
        driver.prefix = "test".to_string();
        let err = driver.run().unwrap_err();
        assert!(err.contains("no input files"));
    }

    #[test]
    fn resolve_input_prefers_include_root_match() {
        let dir = std::env::temp_dir().join(format!("decodergen_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("sample.isa");
        std::fs::write(&file, "isa Test { }").unwrap();

        let mut driver = Driver::new();
        driver.include_dirs.push(dir.clone());
        let resolved = driver.resolve_input("sample.isa");
        assert_eq!(resolved, file);

        std::fs::remove_dir_all(&dir).ok();
    }
}
