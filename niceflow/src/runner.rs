use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use subprocess::{Popen, PopenConfig, Redirection};
use thiserror::Error;

/// Root unit of the simulated design.
pub const HDL_TOPLEVEL: &str = "nice_top";

/// Module list handed to the testbench runner. The runner splits on commas;
/// the trailing comma yields an empty second entry.
/// TODO: confirm with the runner's argument parsing whether the trailing
/// comma is intentional before removing it.
pub const TEST_MODULE: &str = "nice_test,";

const WORKRUN_DIR: &str = "workrun";
const FLIST_NAME: &str = "flist.f";
const BUILD_LOG: &str = "build.log";
const SIM_BINARY: &str = "sim.vvp";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Couldn't spawn {tool} (is NICEFLOW_{tool}_BIN set?)")]
    SpawnFailed {
        tool: &'static str,
        source: subprocess::PopenError,
    },

    #[error("Error waiting on {tool}")]
    WaitFailed {
        tool: &'static str,
        source: subprocess::PopenError,
    },

    #[error("{tool} exited with {status:?}")]
    ToolFailed {
        tool: &'static str,
        status: subprocess::ExitStatus,
    },

    #[error("Simulation flow I/O error")]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, Error>;

/// A single HDL source handed to the simulator front end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerilogSource(pub PathBuf);

#[derive(Debug)]
pub struct BuildOptions<'a> {
    pub sources: &'a [VerilogSource],
    pub toplevel: &'a str,
    /// Rebuild even when the output is newer than every source.
    pub always: bool,
    pub includes: &'a [PathBuf],
    pub build_dir: &'a Path,
    pub clean: bool,
    pub verbose: bool,
    pub waves: bool,
    /// Log file name, relative to `build_dir`.
    pub log_file: &'a str,
}

#[derive(Debug)]
pub struct TestOptions<'a> {
    pub toplevel: &'a str,
    pub test_module: &'a str,
    pub build_dir: &'a Path,
}

/// The external tool that emits the combined file list.
pub trait BuildTool {
    fn emit_flist(&self, out: &Path) -> Result<()>;
}

/// The simulator's compile and test phases.
pub trait Simulator {
    fn build(&self, opts: &BuildOptions) -> Result<()>;
    fn test(&self, opts: &TestOptions) -> Result<()>;
}

/// Runs `bender script flist` with stdout redirected to the target file.
pub struct Bender {
    bin: String,
}

impl Bender {
    pub fn from_env() -> Self {
        Self {
            bin: std::env::var("NICEFLOW_BENDER_BIN").unwrap_or("bender".to_string()),
        }
    }
}

impl BuildTool for Bender {
    fn emit_flist(&self, out: &Path) -> Result<()> {
        let out_file = File::create(out)?;
        let argv = [self.bin.as_str(), "script", "flist"];
        log::debug!("running {:?}", argv);
        let mut p = Popen::create(
            &argv,
            PopenConfig {
                stdout: Redirection::File(out_file),
                ..Default::default()
            },
        )
        .map_err(Error::spawn("BENDER"))?;
        let status = p.wait().map_err(Error::wait("BENDER"))?;
        if !status.success() {
            return Err(Error::ToolFailed {
                tool: "BENDER",
                status,
            });
        }
        Ok(())
    }
}

impl Error {
    fn spawn(tool: &'static str) -> impl Fn(subprocess::PopenError) -> Error {
        move |source| Error::SpawnFailed { tool, source }
    }

    fn wait(tool: &'static str) -> impl Fn(subprocess::PopenError) -> Error {
        move |source| Error::WaitFailed { tool, source }
    }
}

/// cocotb-style icarus runner: compile with iverilog, run under vvp with the
/// cocotb VPI module loaded.
pub struct Icarus {
    iverilog: String,
    vvp: String,
    /// Directory holding the cocotb VPI libraries, when available.
    cocotb_libs: Option<String>,
}

impl Icarus {
    pub fn from_env() -> Self {
        Self {
            iverilog: std::env::var("NICEFLOW_IVERILOG_BIN").unwrap_or("iverilog".to_string()),
            vvp: std::env::var("NICEFLOW_VVP_BIN").unwrap_or("vvp".to_string()),
            cocotb_libs: std::env::var("NICEFLOW_COCOTB_LIBS").ok(),
        }
    }
}

/// Dump module compiled alongside the design when waveform capture is on.
/// It is selected as an extra root so its initial block always runs.
fn waves_module(toplevel: &str) -> String {
    format!(
        "module waves_dump;\n\
         initial begin\n\
         \x20   $dumpfile(\"waves.vcd\");\n\
         \x20   $dumpvars(0, {});\n\
         end\n\
         endmodule\n",
        toplevel
    )
}

fn up_to_date(out: &Path, sources: &[VerilogSource]) -> bool {
    let out_mtime = match fs::metadata(out).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(_) => return false,
    };
    sources.iter().all(|src| {
        match fs::metadata(&src.0).and_then(|m| m.modified()) {
            Ok(t) => t <= out_mtime,
            Err(_) => false,
        }
    })
}

impl Simulator for Icarus {
    fn build(&self, opts: &BuildOptions) -> Result<()> {
        if opts.clean && opts.build_dir.exists() {
            fs::remove_dir_all(opts.build_dir)?;
        }
        fs::create_dir_all(opts.build_dir)?;

        let out = opts.build_dir.join(SIM_BINARY);
        if !opts.always && up_to_date(&out, opts.sources) {
            log::info!("{} is up to date, skipping compile", out.display());
            return Ok(());
        }

        let mut argv: Vec<OsString> = vec![
            self.iverilog.as_str().into(),
            "-g2012".into(),
            "-o".into(),
            out.into(),
            "-s".into(),
            opts.toplevel.into(),
        ];
        if opts.waves {
            let dump = opts.build_dir.join("waves.v");
            fs::write(&dump, waves_module(opts.toplevel))?;
            argv.push("-s".into());
            argv.push("waves_dump".into());
            argv.push(dump.into());
        }
        for inc in opts.includes {
            argv.push("-I".into());
            argv.push(inc.into());
        }
        for src in opts.sources {
            argv.push(src.0.clone().into());
        }

        if opts.verbose {
            log::info!("running {:?}", argv);
        } else {
            log::debug!("running {:?}", argv);
        }

        let log_file = File::create(opts.build_dir.join(opts.log_file))?;
        let mut p = Popen::create(
            &argv,
            PopenConfig {
                stdout: Redirection::File(log_file),
                stderr: Redirection::Merge,
                ..Default::default()
            },
        )
        .map_err(Error::spawn("IVERILOG"))?;
        let status = p.wait().map_err(Error::wait("IVERILOG"))?;
        if !status.success() {
            return Err(Error::ToolFailed {
                tool: "IVERILOG",
                status,
            });
        }
        Ok(())
    }

    fn test(&self, opts: &TestOptions) -> Result<()> {
        let mut argv: Vec<OsString> = vec![self.vvp.as_str().into()];
        if let Some(libs) = &self.cocotb_libs {
            argv.push("-M".into());
            argv.push(libs.as_str().into());
            argv.push("-m".into());
            argv.push("cocotbvpi_icarus".into());
        }
        argv.push(SIM_BINARY.into());

        let mut env: Vec<(OsString, OsString)> = std::env::vars_os()
            .filter(|(k, _)| k != "MODULE" && k != "TOPLEVEL" && k != "TOPLEVEL_LANG")
            .collect();
        env.push(("MODULE".into(), opts.test_module.into()));
        env.push(("TOPLEVEL".into(), opts.toplevel.into()));
        env.push(("TOPLEVEL_LANG".into(), "verilog".into()));

        log::info!("running {:?} in {}", argv, opts.build_dir.display());
        let mut p = Popen::create(
            &argv,
            PopenConfig {
                cwd: Some(opts.build_dir.as_os_str().to_owned()),
                env: Some(env),
                ..Default::default()
            },
        )
        .map_err(Error::spawn("VVP"))?;
        let status = p.wait().map_err(Error::wait("VVP"))?;
        if !status.success() {
            return Err(Error::ToolFailed {
                tool: "VVP",
                status,
            });
        }
        Ok(())
    }
}

/// Reads the file list emitted by the build tool. Lines are trimmed and
/// blank lines dropped; order is otherwise preserved.
pub fn read_sources(flist: &Path) -> Result<Vec<VerilogSource>> {
    let text = fs::read_to_string(flist)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| VerilogSource(PathBuf::from(line)))
        .collect())
}

/// One include directory per source: its parent. Duplicates are kept.
pub fn include_dirs(sources: &[VerilogSource]) -> Vec<PathBuf> {
    sources
        .iter()
        .map(|src| {
            src.0
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."))
                .to_path_buf()
        })
        .collect()
}

/// Drives the whole flow: file list from the build tool, compile, test.
pub fn run(sim_dir: &Path, tool: &dyn BuildTool, sim: &dyn Simulator) -> Result<()> {
    let workrun = sim_dir.join(WORKRUN_DIR);
    fs::create_dir_all(&workrun)?;

    let flist_path = sim_dir.join(FLIST_NAME);
    tool.emit_flist(&flist_path)?;

    let sources = read_sources(&flist_path)?;
    let includes = include_dirs(&sources);

    sim.build(&BuildOptions {
        sources: &sources,
        toplevel: HDL_TOPLEVEL,
        always: true,
        includes: &includes,
        build_dir: &workrun,
        clean: true,
        verbose: true,
        waves: true,
        log_file: BUILD_LOG,
    })?;

    sim.test(&TestOptions {
        toplevel: HDL_TOPLEVEL,
        test_module: TEST_MODULE,
        build_dir: &workrun,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;

    fn src(path: &str) -> VerilogSource {
        VerilogSource(PathBuf::from(path))
    }

    #[test]
    fn test_read_sources_drops_blank_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let flist = tmp.path().join("flist.f");
        fs::write(&flist, "a.v\n\n   \n/rtl/b.sv\n\t\nc.v").unwrap();

        let sources = read_sources(&flist).unwrap();
        assert_eq!(sources, vec![src("a.v"), src("/rtl/b.sv"), src("c.v")]);
    }

    #[test]
    fn test_read_sources_trims_whitespace() {
        let tmp = tempfile::tempdir().unwrap();
        let flist = tmp.path().join("flist.f");
        fs::write(&flist, "  a.v  \n\tb.v").unwrap();

        let sources = read_sources(&flist).unwrap();
        assert_eq!(sources, vec![src("a.v"), src("b.v")]);
    }

    #[test]
    fn test_include_dirs_keeps_duplicates() {
        let sources = vec![src("/rtl/a.v"), src("/rtl/b.v"), src("/tb/c.sv")];
        assert_eq!(
            include_dirs(&sources),
            vec![
                PathBuf::from("/rtl"),
                PathBuf::from("/rtl"),
                PathBuf::from("/tb"),
            ]
        );
    }

    #[test]
    fn test_include_dirs_bare_filename() {
        assert_eq!(include_dirs(&[src("a.v")]), vec![PathBuf::from(".")]);
    }

    #[test]
    fn test_up_to_date_missing_output() {
        assert!(!up_to_date(Path::new("/no/such/sim.vvp"), &[]));
    }

    #[test]
    fn test_wait_error_not_reported_as_spawn_failure() {
        let e = Error::WaitFailed {
            tool: "VVP",
            source: subprocess::PopenError::LogicError("wait"),
        };
        assert!(!e.to_string().contains("NICEFLOW"));

        let e = Error::SpawnFailed {
            tool: "VVP",
            source: subprocess::PopenError::LogicError("spawn"),
        };
        assert!(e.to_string().contains("NICEFLOW_VVP_BIN"));
    }

    #[test]
    fn test_waves_module_dumps_toplevel() {
        let text = waves_module("nice_top");
        assert!(text.contains("$dumpvars(0, nice_top)"));
        assert!(text.contains("$dumpfile(\"waves.vcd\")"));
    }

    struct FakeTool {
        content: &'static str,
    }

    impl BuildTool for FakeTool {
        fn emit_flist(&self, out: &Path) -> Result<()> {
            fs::write(out, self.content)?;
            Ok(())
        }
    }

    #[derive(Clone, Debug)]
    struct BuildCall {
        sources: Vec<VerilogSource>,
        toplevel: String,
        always: bool,
        includes: Vec<PathBuf>,
        build_dir: PathBuf,
        clean: bool,
        verbose: bool,
        waves: bool,
        log_file: String,
    }

    #[derive(Clone, Debug)]
    struct TestCall {
        toplevel: String,
        test_module: String,
        build_dir: PathBuf,
    }

    #[derive(Default)]
    struct Recorder {
        built: RefCell<Option<BuildCall>>,
        tested: RefCell<Option<TestCall>>,
    }

    impl Simulator for Recorder {
        fn build(&self, opts: &BuildOptions) -> Result<()> {
            *self.built.borrow_mut() = Some(BuildCall {
                sources: opts.sources.to_vec(),
                toplevel: opts.toplevel.to_string(),
                always: opts.always,
                includes: opts.includes.to_vec(),
                build_dir: opts.build_dir.to_path_buf(),
                clean: opts.clean,
                verbose: opts.verbose,
                waves: opts.waves,
                log_file: opts.log_file.to_string(),
            });
            Ok(())
        }

        fn test(&self, opts: &TestOptions) -> Result<()> {
            assert!(self.built.borrow().is_some(), "test phase before build");
            *self.tested.borrow_mut() = Some(TestCall {
                toplevel: opts.toplevel.to_string(),
                test_module: opts.test_module.to_string(),
                build_dir: opts.build_dir.to_path_buf(),
            });
            Ok(())
        }
    }

    #[test]
    fn test_run_sequence() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = FakeTool {
            content: "/rtl/a.v\n\n/rtl/b.v\n   \n/tb/tb.sv\n",
        };
        let sim = Recorder::default();

        run(tmp.path(), &tool, &sim).unwrap();

        let workrun = tmp.path().join("workrun");
        assert!(workrun.is_dir());
        assert!(tmp.path().join("flist.f").is_file());

        let built = sim.built.borrow().clone().unwrap();
        assert_eq!(
            built.sources,
            vec![src("/rtl/a.v"), src("/rtl/b.v"), src("/tb/tb.sv")]
        );
        assert_eq!(built.toplevel, "nice_top");
        assert!(built.always);
        assert_eq!(
            built.includes,
            vec![
                PathBuf::from("/rtl"),
                PathBuf::from("/rtl"),
                PathBuf::from("/tb"),
            ]
        );
        assert_eq!(built.build_dir, workrun);
        assert!(built.clean);
        assert!(built.verbose);
        assert!(built.waves);
        assert_eq!(built.log_file, "build.log");

        let tested = sim.tested.borrow().clone().unwrap();
        assert_eq!(tested.toplevel, "nice_top");
        assert_eq!(tested.test_module, "nice_test,");
        assert_eq!(tested.build_dir, workrun);
    }

    #[test]
    fn test_run_with_existing_workrun() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("workrun")).unwrap();
        let tool = FakeTool { content: "a.v\n" };
        let sim = Recorder::default();

        run(tmp.path(), &tool, &sim).unwrap();
        assert!(sim.tested.borrow().is_some());
    }
}
