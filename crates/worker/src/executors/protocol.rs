//! 沙箱脚本协议
//!
//! 虚拟机内的驱动脚本从只读挂载的 `/scratch/cells.json` 读取本次运行的标记和单元格源码，
//! 按顺序执行，并通过标准输出回传结果：
//!
//! ```text
//! START_CELL_0#<nonce>
//! <单元格0的输出>
//! END_CELL_0#<nonce>
//! ...
//! ---RESULTS---#<nonce>
//! [{"success": true, "error": null, "output": ""}, ...]
//! ---END_RESULTS---#<nonce>
//! ```
//!
//! 每次运行生成新的 nonce，单元格自己打印的分隔符不会被当作协议行。
//! 单元格源码只以数据形式传入，驱动脚本本身是常量。

use std::collections::HashMap;

use autograder_domain::{CellError, CellResult, ExecutionCell, GradingError, GradingResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const START_CELL_PREFIX: &str = "START_CELL_";
pub const END_CELL_PREFIX: &str = "END_CELL_";
pub const RESULTS_BEGIN: &str = "---RESULTS---";
pub const RESULTS_END: &str = "---END_RESULTS---";

/// 虚拟机内只读挂载的数据目录
pub const GUEST_SCRATCH_DIR: &str = "/scratch";
/// 单元格源码数据文件名
pub const CELLS_FILE: &str = "cells.json";

pub const DRIVER_SCRIPT: &str = r#"
import json
import traceback

with open('/scratch/cells.json') as f:
    payload = json.load(f)

tag = '#' + payload['nonce'] if payload['nonce'] else ''
env = {'__name__': '__main__'}
results = []
for i, source in enumerate(payload['cells']):
    print(f'START_CELL_{i}{tag}', flush=True)
    try:
        exec(compile(source, f'<cell {i}>', 'exec'), env)
        success = True
        error = None
    except BaseException:
        success = False
        error = traceback.format_exc()
    print(f'END_CELL_{i}{tag}', flush=True)
    results.append({'success': success, 'error': error, 'output': ''})

print('---RESULTS---' + tag)
print(json.dumps(results))
print('---END_RESULTS---' + tag, flush=True)
"#;

/// 一次运行的协议标记
///
/// 所有标记行都带上 `#<nonce>` 后缀；nonce 为空时退化为不带后缀的原始标记。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMarkers {
    nonce: String,
}

impl RunMarkers {
    pub fn new(nonce: impl Into<String>) -> Self {
        Self {
            nonce: nonce.into(),
        }
    }

    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().simple().to_string())
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    fn tagged(&self, token: &str) -> String {
        if self.nonce.is_empty() {
            token.to_string()
        } else {
            format!("{token}#{}", self.nonce)
        }
    }

    pub fn start(&self, idx: usize) -> String {
        self.tagged(&format!("{START_CELL_PREFIX}{idx}"))
    }

    pub fn end(&self, idx: usize) -> String {
        self.tagged(&format!("{END_CELL_PREFIX}{idx}"))
    }

    pub fn results_begin(&self) -> String {
        self.tagged(RESULTS_BEGIN)
    }

    pub fn results_end(&self) -> String {
        self.tagged(RESULTS_END)
    }
}

/// 脚本回传的单元格结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawCellResult {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub output: String,
}

impl RawCellResult {
    pub fn into_cell_result(self) -> CellResult {
        if self.success {
            return CellResult::success(self.output);
        }
        let error = match self.error {
            Some(traceback) => CellError::with_traceback(summarize(&traceback), traceback),
            None => CellError::new("Unknown error"),
        };
        CellResult::failure(self.output, error)
    }
}

/// 回溯的最后一个非空行，通常是 `ExceptionType: message`
fn summarize(traceback: &str) -> String {
    traceback
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("Unknown error")
        .trim()
        .to_string()
}

#[derive(Serialize)]
struct CellsPayload<'a> {
    nonce: &'a str,
    cells: Vec<&'a str>,
}

/// 序列化要写入数据文件的标记和单元格源码
pub fn encode_cells<'a, I>(cells: I, markers: &'a RunMarkers) -> GradingResult<String>
where
    I: IntoIterator<Item = &'a ExecutionCell>,
{
    let payload = CellsPayload {
        nonce: markers.nonce(),
        cells: cells.into_iter().map(|c| c.source.as_str()).collect(),
    };
    Ok(serde_json::to_string(&payload)?)
}

/// 拆分后的标准输出
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Demultiplexed {
    /// 单元格序号 -> 输出
    pub outputs: HashMap<usize, String>,
    /// 按出现顺序记录的已结束单元格序号
    pub finished: Vec<usize>,
    /// 结果分隔符之间的原始文本
    pub results_json: Option<String>,
    /// 结果区块开始前已结束的单元格数
    pub finished_before_results: usize,
}

/// 拆分交错的标准输出
///
/// 只识别带本次运行标记的协议行。`START_CELL_i` 打开单元格 i 的缓冲区，
/// 与之对应的 `END_CELL_i` 关闭它；结束标记前没有换行的输出仍计入该单元格。
/// 结果分隔符之间的内容原样保留且不计入任何单元格，不在任何区间内的行被丢弃。
pub fn demultiplex(stdout: &str, markers: &RunMarkers) -> Demultiplexed {
    let mut out = Demultiplexed::default();
    let results_begin = markers.results_begin();
    let results_end = markers.results_end();
    let mut results: Option<Vec<&str>> = None;
    let mut current: Option<(usize, String, Vec<&str>)> = None;

    for line in stdout.lines() {
        if let Some(lines) = results.as_mut() {
            if line == results_end {
                out.results_json = results.take().map(|lines| lines.join("\n"));
            } else {
                lines.push(line);
            }
            continue;
        }

        if let Some((idx, end, mut lines)) = current.take() {
            match line.strip_suffix(end.as_str()) {
                Some(rest) => {
                    if !rest.is_empty() {
                        lines.push(rest);
                    }
                    out.outputs.insert(idx, lines.join("\n"));
                    out.finished.push(idx);
                }
                None => {
                    lines.push(line);
                    current = Some((idx, end, lines));
                }
            }
            continue;
        }

        if line == results_begin {
            out.finished_before_results = out.finished.len();
            results = Some(Vec::new());
        } else if let Some(idx) = start_index(line, markers) {
            current = Some((idx, markers.end(idx), Vec::new()));
        }
    }

    out
}

fn start_index(line: &str, markers: &RunMarkers) -> Option<usize> {
    let line = if markers.nonce().is_empty() {
        line
    } else {
        line.strip_suffix(markers.nonce())?.strip_suffix('#')?
    };
    line.strip_prefix(START_CELL_PREFIX)?.parse().ok()
}

/// 解析标准输出，得到按脚本顺序排列的单元格结果，输出字段由拆分结果回填
///
/// 只接受在最后一个单元格结束之后出现、且条数与脚本单元格数一致的结果区块。
pub fn parse_output(
    stdout: &str,
    markers: &RunMarkers,
    cell_count: usize,
) -> GradingResult<Vec<RawCellResult>> {
    let demuxed = demultiplex(stdout, markers);
    let payload = demuxed
        .results_json
        .ok_or_else(|| GradingError::sandbox_error("标准输出中缺少结果区块"))?;

    if !demuxed.finished.iter().copied().eq(0..cell_count) {
        return Err(GradingError::sandbox_error(format!(
            "单元格结束标记不完整: 期望 {} 个，实际 {:?}",
            cell_count, demuxed.finished
        )));
    }
    if demuxed.finished_before_results != cell_count {
        return Err(GradingError::sandbox_error("结果区块出现在单元格执行结束之前"));
    }

    let mut results: Vec<RawCellResult> = serde_json::from_str(&payload)?;
    if results.len() != cell_count {
        return Err(GradingError::sandbox_error(format!(
            "结果数量与单元格数量不一致: {} != {}",
            results.len(),
            cell_count
        )));
    }
    for (idx, result) in results.iter_mut().enumerate() {
        result.output = demuxed.outputs.get(&idx).cloned().unwrap_or_default();
    }
    Ok(results)
}

/// 将结果按位置与脚本中的代码单元格对应起来
pub fn zip_results(
    cells: &[&ExecutionCell],
    results: Vec<RawCellResult>,
) -> HashMap<String, CellResult> {
    cells
        .iter()
        .zip(results)
        .map(|(cell, raw)| (cell.id.clone(), raw.into_cell_result()))
        .collect()
}
