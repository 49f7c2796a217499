//! 直接执行器
//!
//! 在宿主机的Python解释器子进程中执行单元格，没有任何隔离，
//! 只能用于受信任的代码。同一本笔记本的单元格在同一个解释器中按顺序执行，
//! 后面的单元格可以看到前面单元格定义的变量。

use std::collections::{HashMap, HashSet};
use std::process::Stdio;

use async_trait::async_trait;
use autograder_domain::{
    CellError, CellResult, ExecutionCell, ExecutionNotebook, GradingError, GradingResult,
    NotebookRun,
};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::RawCellResult;
use super::NotebookExecutor;

/// 每行一个请求 `{"source": ...}`，每行一个应答 `{"success", "output", "error"}`。
///
/// 请求和应答使用启动时复制出的专用描述符；执行单元格期间 fd 1/2 被重定向到临时文件，
/// 子进程和C扩展直接写描述符的输出也会被合并捕获，不会混入应答通道。
const DRIVER_SCRIPT: &str = r#"
import io
import json
import os
import sys
import tempfile
import traceback

requests = os.fdopen(os.dup(0), 'r')
reply = os.fdopen(os.dup(1), 'w')
saved_stderr = os.dup(2)
devnull = os.open(os.devnull, os.O_RDWR)
os.dup2(devnull, 0)
os.dup2(devnull, 1)
sys.stdin = io.StringIO()
sys.stdout.reconfigure(line_buffering=True)
env = {'__name__': '__main__'}


def flush_streams():
    for stream in (sys.__stdout__, sys.__stderr__):
        try:
            stream.flush()
        except Exception:
            pass


for line in requests:
    source = json.loads(line)['source']
    success = True
    error = None
    with tempfile.TemporaryFile() as capture:
        os.dup2(capture.fileno(), 1)
        os.dup2(capture.fileno(), 2)
        try:
            exec(compile(source, '<cell>', 'exec'), env)
        except BaseException:
            success = False
            error = traceback.format_exc()
        finally:
            flush_streams()
            os.dup2(devnull, 1)
            os.dup2(saved_stderr, 2)
        capture.seek(0)
        output = capture.read().decode('utf-8', 'replace')
    reply.write(json.dumps({'success': success, 'output': output, 'error': error}) + '\n')
    reply.flush()
"#;

#[derive(Serialize)]
struct CellRequest<'a> {
    source: &'a str,
}

pub struct DirectExecutor {
    interpreter: String,
}

impl DirectExecutor {
    pub fn new(interpreter: impl Into<String>) -> Self {
        let interpreter = interpreter.into();
        warn!(
            "DirectExecutor已初始化: interpreter={}，代码直接在宿主机上执行，没有隔离",
            interpreter
        );
        Self { interpreter }
    }

    /// 依次执行单元格，单元格之间共享解释器状态
    ///
    /// 解释器在某个单元格中退出时，该单元格记为失败，
    /// 后续单元格在新启动的解释器中继续执行。
    async fn run_cells(&self, cells: &[&ExecutionCell]) -> GradingResult<NotebookRun> {
        let mut results = HashMap::with_capacity(cells.len());
        let mut interpreter: Option<Interpreter> = None;

        for cell in cells {
            let mut current = match interpreter.take() {
                Some(current) => current,
                None => Interpreter::spawn(&self.interpreter)?,
            };

            match current.run(cell).await {
                Ok(result) => {
                    results.insert(cell.id.clone(), result);
                    interpreter = Some(current);
                }
                Err(reason) => {
                    let diagnostics = current.terminate().await;
                    warn!(
                        "Python解释器在单元格 {} 中异常退出: {}\n{}",
                        cell.id, reason, diagnostics
                    );
                    let error = CellError::with_traceback(reason, diagnostics);
                    results.insert(cell.id.clone(), CellResult::failure("", error));
                }
            }
        }

        if let Some(current) = interpreter {
            current.finish().await;
        }
        Ok(NotebookRun::Completed(results))
    }
}

/// 一个运行中的驱动脚本进程
struct Interpreter {
    child: Child,
    stdin: ChildStdin,
    replies: Lines<BufReader<ChildStdout>>,
    stderr: JoinHandle<String>,
}

impl Interpreter {
    fn spawn(interpreter: &str) -> GradingResult<Self> {
        let mut child = Command::new(interpreter)
            .arg("-c")
            .arg(DRIVER_SCRIPT)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GradingError::execution_error(format!("启动Python解释器失败 {interpreter}: {e}"))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GradingError::execution_error("无法获取stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GradingError::execution_error("无法获取stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| GradingError::execution_error("无法获取stderr"))?;

        let stderr = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });
        debug!("Python解释器已启动: {}", interpreter);

        Ok(Self {
            child,
            stdin,
            replies: BufReader::new(stdout).lines(),
            stderr,
        })
    }

    /// 执行一个单元格；解释器退出或应答无法解析时返回原因
    async fn run(&mut self, cell: &ExecutionCell) -> Result<CellResult, String> {
        let mut request = serde_json::to_string(&CellRequest {
            source: &cell.source,
        })
        .map_err(|e| format!("序列化单元格请求失败: {e}"))?;
        request.push('\n');

        self.stdin
            .write_all(request.as_bytes())
            .await
            .map_err(|e| format!("写入单元格 {} 失败: {e}", cell.id))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| format!("写入单元格 {} 失败: {e}", cell.id))?;

        let line = self
            .replies
            .next_line()
            .await
            .map_err(|e| format!("读取单元格 {} 结果失败: {e}", cell.id))?
            .ok_or_else(|| format!("执行单元格 {} 时解释器退出", cell.id))?;
        let reply: RawCellResult = serde_json::from_str(&line)
            .map_err(|e| format!("单元格 {} 的应答无法解析: {e}", cell.id))?;

        Ok(reply.into_cell_result())
    }

    /// 结束进程，返回退出状态和stderr
    async fn terminate(mut self) -> String {
        let _ = self.child.start_kill();
        let status = match self.child.wait().await {
            Ok(status) => status.to_string(),
            Err(e) => format!("无法获取退出状态: {e}"),
        };
        drop(self.stdin);
        let stderr = self.stderr.await.unwrap_or_default();
        format!("{status}\n{stderr}")
    }

    /// 关闭请求通道，等待驱动脚本自行退出
    async fn finish(mut self) {
        drop(self.stdin);
        if let Err(e) = self.child.wait().await {
            warn!("等待Python解释器退出失败: {}", e);
        }
    }
}

#[async_trait]
impl NotebookExecutor for DirectExecutor {
    fn name(&self) -> &str {
        "direct"
    }

    async fn execute_cell(&self, cell: &ExecutionCell) -> GradingResult<CellResult> {
        match self.run_cells(&[cell]).await? {
            NotebookRun::Completed(mut results) => results
                .remove(&cell.id)
                .ok_or_else(|| GradingError::execution_error("解释器未返回单元格结果")),
            NotebookRun::Aborted { reason } => Err(GradingError::execution_error(reason)),
        }
    }

    async fn execute_notebook(
        &self,
        notebook: &ExecutionNotebook,
        scope: Option<&HashSet<String>>,
    ) -> GradingResult<NotebookRun> {
        let cells: Vec<&ExecutionCell> = notebook.code_cells(scope).collect();
        info!(
            "直接执行笔记本: name={}, cells={}, code_cells={}",
            notebook.name,
            notebook.cells.len(),
            cells.len()
        );
        self.run_cells(&cells).await
    }
}
