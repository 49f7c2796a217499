//! WASM沙箱执行器
//!
//! 每次执行笔记本都会创建一个独占的虚拟机实例：解释器与标准库只读挂载，
//! 线性内存受上限约束，标准输出/错误写入一次性临时目录中的私有文件。
//! 一个虚拟机实例执行整本笔记本，单元格输出通过 [`protocol`] 拆分。

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use autograder_config::SandboxExecutorConfig;
use autograder_domain::{
    CellError, CellResult, ExecutionCell, ExecutionNotebook, GradingError, GradingResult,
    NotebookRun,
};
use tracing::{debug, error, info};
use wasmtime::{Engine, Linker, Module, Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::{DirPerms, FilePerms, I32Exit, OutputFile, WasiCtxBuilder};

use super::protocol::{self, RunMarkers, CELLS_FILE, DRIVER_SCRIPT, GUEST_SCRATCH_DIR};
use super::NotebookExecutor;

/// 标准库在虚拟机内的挂载点
pub const GUEST_STDLIB_DIR: &str = "/usr/local/lib/python3.11";

const STDOUT_FILE: &str = "out.log";
const STDERR_FILE: &str = "err.log";

struct SandboxState {
    wasi: WasiP1Ctx,
    limits: StoreLimits,
}

/// 编译好的解释器模块可以在多个执行器之间克隆共享，虚拟机实例不共享
#[derive(Clone)]
pub struct SandboxExecutor {
    engine: Engine,
    module: Module,
    stdlib_path: PathBuf,
    memory_limit: usize,
}

impl SandboxExecutor {
    /// 资源缺失或内存上限非正时立即失败
    pub fn new(config: &SandboxExecutorConfig) -> GradingResult<Self> {
        let interpreter_path = Path::new(&config.interpreter_path);
        if !interpreter_path.exists() {
            return Err(GradingError::config_error(format!(
                "未找到Python WASM模块: {}",
                config.interpreter_path
            )));
        }

        let stdlib_path = PathBuf::from(&config.stdlib_path);
        if !stdlib_path.exists() {
            return Err(GradingError::config_error(format!(
                "未找到Python标准库: {}",
                config.stdlib_path
            )));
        }

        if config.memory_limit_bytes <= 0 {
            return Err(GradingError::config_error("内存上限必须为正数"));
        }
        let memory_limit = usize::try_from(config.memory_limit_bytes).map_err(|_| {
            GradingError::config_error(format!(
                "内存上限超出平台范围: {}",
                config.memory_limit_bytes
            ))
        })?;

        let engine = Engine::default();
        let module = Module::from_file(&engine, interpreter_path).map_err(|e| {
            GradingError::config_error(format!("加载WASM模块失败 {}: {e}", config.interpreter_path))
        })?;

        info!(
            "SandboxExecutor已初始化: interpreter={}, stdlib={}, memory_limit={}",
            config.interpreter_path, config.stdlib_path, memory_limit
        );

        Ok(Self {
            engine,
            module,
            stdlib_path,
            memory_limit,
        })
    }

    /// 在阻塞线程中运行一次虚拟机，返回其标准输出
    async fn run(&self, cells_json: String) -> GradingResult<String> {
        let engine = self.engine.clone();
        let module = self.module.clone();
        let stdlib_path = self.stdlib_path.clone();
        let memory_limit = self.memory_limit;

        tokio::task::spawn_blocking(move || {
            run_vm(&engine, &module, &stdlib_path, memory_limit, &cells_json)
        })
        .await
        .map_err(|e| GradingError::Internal(format!("沙箱执行线程异常: {e}")))?
    }
}

fn run_vm(
    engine: &Engine,
    module: &Module,
    stdlib_path: &Path,
    memory_limit: usize,
    cells_json: &str,
) -> GradingResult<String> {
    let scratch = tempfile::tempdir()?;
    fs::write(scratch.path().join(CELLS_FILE), cells_json)?;
    let stdout_path = scratch.path().join(STDOUT_FILE);
    let stderr_path = scratch.path().join(STDERR_FILE);

    let mut builder = WasiCtxBuilder::new();
    builder
        .args(&["python", "-c", DRIVER_SCRIPT])
        .stdout(OutputFile::new(File::create(&stdout_path)?))
        .stderr(OutputFile::new(File::create(&stderr_path)?));
    builder
        .preopened_dir(stdlib_path, GUEST_STDLIB_DIR, DirPerms::READ, FilePerms::READ)
        .map_err(|e| GradingError::sandbox_error(format!("挂载标准库失败: {e}")))?;
    builder
        .preopened_dir(scratch.path(), GUEST_SCRATCH_DIR, DirPerms::READ, FilePerms::READ)
        .map_err(|e| GradingError::sandbox_error(format!("挂载数据目录失败: {e}")))?;

    let limits = StoreLimitsBuilder::new()
        .memory_size(memory_limit)
        .trap_on_grow_failure(true)
        .build();
    let mut store = Store::new(
        engine,
        SandboxState {
            wasi: builder.build_p1(),
            limits,
        },
    );
    store.limiter(|state| &mut state.limits);

    let outcome = start(engine, module, &mut store);
    drop(store);

    match outcome {
        Ok(()) => Ok(fs::read_to_string(&stdout_path)?),
        Err(e) if matches!(e.downcast_ref::<I32Exit>(), Some(I32Exit(0))) => {
            Ok(fs::read_to_string(&stdout_path)?)
        }
        Err(e) => {
            let stderr = fs::read_to_string(&stderr_path).unwrap_or_default();
            Err(GradingError::sandbox_error(format!(
                "WASM执行失败: {e:#}\nStderr: {stderr}"
            )))
        }
    }
}

fn start(engine: &Engine, module: &Module, store: &mut Store<SandboxState>) -> wasmtime::Result<()> {
    let mut linker: Linker<SandboxState> = Linker::new(engine);
    preview1::add_to_linker_sync(&mut linker, |state: &mut SandboxState| &mut state.wasi)?;
    let instance = linker.instantiate(&mut *store, module)?;
    let entry = instance.get_typed_func::<(), ()>(&mut *store, "_start")?;
    entry.call(&mut *store, ())
}

#[async_trait]
impl NotebookExecutor for SandboxExecutor {
    fn name(&self) -> &str {
        "sandbox"
    }

    async fn execute_cell(&self, cell: &ExecutionCell) -> GradingResult<CellResult> {
        let notebook = ExecutionNotebook {
            name: format!("cell-{}", cell.id),
            kernelspec: None,
            cells: vec![cell.clone()],
        };

        match self.execute_notebook(&notebook, None).await? {
            NotebookRun::Completed(mut results) => Ok(results
                .remove(&cell.id)
                .unwrap_or_else(|| CellResult::failure("", CellError::new("沙箱未返回单元格结果")))),
            NotebookRun::Aborted { reason } => Ok(CellResult::failure("", CellError::new(reason))),
        }
    }

    async fn execute_notebook(
        &self,
        notebook: &ExecutionNotebook,
        scope: Option<&HashSet<String>>,
    ) -> GradingResult<NotebookRun> {
        self.run_notebook(notebook, scope, RunMarkers::generate()).await
    }
}

impl SandboxExecutor {
    async fn run_notebook(
        &self,
        notebook: &ExecutionNotebook,
        scope: Option<&HashSet<String>>,
        markers: RunMarkers,
    ) -> GradingResult<NotebookRun> {
        let cells: Vec<&ExecutionCell> = notebook.code_cells(scope).collect();
        info!(
            "在沙箱中执行笔记本: name={}, cells={}, code_cells={}",
            notebook.name,
            notebook.cells.len(),
            cells.len()
        );

        let cells_json = protocol::encode_cells(cells.iter().copied(), &markers)?;

        let stdout = match self.run(cells_json).await {
            Ok(stdout) => stdout,
            Err(e @ GradingError::Internal(_)) => return Err(e),
            Err(e) => {
                error!("沙箱执行失败: notebook={}, error={}", notebook.name, e);
                return Ok(NotebookRun::aborted(e.to_string()));
            }
        };

        let raw = match protocol::parse_output(&stdout, &markers, cells.len()) {
            Ok(raw) => raw,
            Err(e) => {
                error!("解析沙箱输出失败: notebook={}, error={}", notebook.name, e);
                return Ok(NotebookRun::aborted(e.to_string()));
            }
        };

        debug!("沙箱返回 {} 个单元格结果", raw.len());
        Ok(NotebookRun::Completed(protocol::zip_results(&cells, raw)))
    }
}
