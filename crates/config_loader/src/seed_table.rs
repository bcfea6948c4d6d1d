//! 种子表解析
//!
//! 把种子表 (CSV) 转成有序的 `SequenceDescriptor` 列表。
//!
//! 支持两种布局：
//! - 带表头：必须包含 `seed` 与 `map` 列，可选 `sun_altitude` (`sun_alt`) 与 `cloudiness` 列
//! - 无表头的五列旧格式：`out_name;seed;map;sun_alt;cloudiness`
//!
//! 分隔符从第一行自动判断 (`;` 优先，否则 `,`)。单行错误只跳过该行。

use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};
use contracts::{ContractError, SequenceDescriptor, WeatherSpec};
use tracing::{debug, warn};

/// 列位置
#[derive(Debug, Clone, Copy)]
struct Columns {
    seed: usize,
    map: usize,
    sun_altitude: Option<usize>,
    cloudiness: Option<usize>,
}

impl Columns {
    const LEGACY: Columns = Columns {
        seed: 1,
        map: 2,
        sun_altitude: Some(3),
        cloudiness: Some(4),
    };

    fn from_header(header: &csv::StringRecord) -> Option<Self> {
        let find = |names: &[&str]| {
            header
                .iter()
                .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        };
        Some(Self {
            seed: find(&["seed"])?,
            map: find(&["map", "map_name"])?,
            sun_altitude: find(&["sun_altitude", "sun_alt"]),
            cloudiness: find(&["cloudiness"]),
        })
    }
}

/// 有序的序列计划
#[derive(Debug, Default)]
pub struct SequencePlan {
    descriptors: Vec<SequenceDescriptor>,
    rejected: Vec<ContractError>,
}

impl SequencePlan {
    /// 从种子表文件构建
    ///
    /// # Errors
    /// 文件无法读取，或表头缺少 `seed` / `map` 列
    pub fn from_path(
        path: &Path,
        out_folder: &Path,
        allowed_maps: &[String],
    ) -> Result<Self, ContractError> {
        let file = std::fs::File::open(path).map_err(|e| {
            ContractError::config_parse(format!("cannot open seed table {}: {e}", path.display()))
        })?;
        Self::from_reader(file, out_folder, allowed_maps)
    }

    /// 从任意读取源构建
    pub fn from_reader<R: Read>(
        mut reader: R,
        out_folder: &Path,
        allowed_maps: &[String],
    ) -> Result<Self, ContractError> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;

        let Some(first_line) = content.lines().find(|l| !l.trim().is_empty()) else {
            return Ok(Self::default());
        };
        let delimiter = if first_line.contains(';') { b';' } else { b',' };

        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let mut records = rdr.records();
        let mut plan = Self::default();

        // 第一条记录决定布局
        let (columns, legacy_first) = match records.next() {
            None => return Ok(plan),
            Some(Err(e)) => {
                return Err(ContractError::config_parse(format!(
                    "unreadable seed table header: {e}"
                )))
            }
            Some(Ok(first)) => match Columns::from_header(&first) {
                Some(columns) => (columns, None),
                None if looks_like_legacy_row(&first) => {
                    debug!("seed table has no header, using legacy five-column layout");
                    (Columns::LEGACY, Some(first))
                }
                None => {
                    return Err(ContractError::config_validation(
                        "seeds",
                        "seed table header must contain 'seed' and 'map' columns",
                    ))
                }
            },
        };

        if let Some(first) = legacy_first {
            plan.accept(parse_row(&first, columns, out_folder, allowed_maps));
        }

        for record in records {
            let row = record
                .map_err(|e| {
                    let line = e.position().map(|p| p.line()).unwrap_or(0);
                    ContractError::malformed_row(line, e.to_string())
                })
                .and_then(|r| parse_row(&r, columns, out_folder, allowed_maps));
            plan.accept(row);
        }

        Ok(plan)
    }

    /// 无种子表时的随机计划
    ///
    /// 种子取自当前时间 `YYYYMMDDHHMMSS` 再拼接序号，地图按种子轮选。
    pub fn random<Tz: TimeZone>(
        count: usize,
        now: DateTime<Tz>,
        out_folder: &Path,
        maps: &[String],
    ) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        let base: u64 = now
            .format("%Y%m%d%H%M%S")
            .to_string()
            .parse()
            .unwrap_or_default();
        let descriptors = (0..count as u64)
            .map(|i| {
                let seed = base * 1000 + i;
                let map = if maps.is_empty() {
                    "Town01".to_string()
                } else {
                    maps[(seed % maps.len() as u64) as usize].clone()
                };
                SequenceDescriptor::new(seed, map, WeatherSpec::from_seed(seed), out_folder)
            })
            .collect();
        Self {
            descriptors,
            rejected: Vec::new(),
        }
    }

    fn accept(&mut self, row: Result<SequenceDescriptor, ContractError>) {
        match row {
            Ok(descriptor) => self.descriptors.push(descriptor),
            Err(e) => {
                warn!(error = %e, "skipping seed row");
                self.rejected.push(e);
            }
        }
    }

    pub fn descriptors(&self) -> &[SequenceDescriptor] {
        &self.descriptors
    }

    /// 被跳过的行
    pub fn rejected(&self) -> &[ContractError] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// 所有输出路径 (按计划顺序)
    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.descriptors
            .iter()
            .map(|d| d.output_path.clone())
            .collect()
    }
}

impl IntoIterator for SequencePlan {
    type Item = SequenceDescriptor;
    type IntoIter = std::vec::IntoIter<SequenceDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.descriptors.into_iter()
    }
}

fn looks_like_legacy_row(record: &csv::StringRecord) -> bool {
    record.len() == 5 && record.get(1).is_some_and(|s| s.parse::<u64>().is_ok())
}

fn parse_row(
    record: &csv::StringRecord,
    columns: Columns,
    out_folder: &Path,
    allowed_maps: &[String],
) -> Result<SequenceDescriptor, ContractError> {
    let line = record.position().map(|p| p.line()).unwrap_or(0);
    let field = |idx: usize| record.get(idx).map(str::trim).filter(|s| !s.is_empty());

    let seed_raw = field(columns.seed).ok_or_else(|| ContractError::malformed_row(line, "missing seed"))?;
    let seed: u64 = seed_raw
        .parse()
        .map_err(|_| ContractError::malformed_row(line, format!("seed '{seed_raw}' is not a non-negative integer")))?;

    let map = field(columns.map).ok_or_else(|| ContractError::malformed_row(line, "missing map"))?;
    if !allowed_maps.is_empty() && !allowed_maps.iter().any(|m| m == map) {
        return Err(ContractError::malformed_row(
            line,
            format!("map '{map}' is not in the allowed map list"),
        ));
    }

    let derived = WeatherSpec::from_seed(seed);
    let parse_f32 = |idx: Option<usize>, name: &str| -> Result<Option<f32>, ContractError> {
        match idx.and_then(field) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<f32>()
                .map(Some)
                .map_err(|_| ContractError::malformed_row(line, format!("{name} '{raw}' is not a number"))),
        }
    };
    let weather = WeatherSpec {
        sun_altitude_deg: parse_f32(columns.sun_altitude, "sun_altitude")?
            .unwrap_or(derived.sun_altitude_deg),
        cloudiness: parse_f32(columns.cloudiness, "cloudiness")?.unwrap_or(derived.cloudiness),
    };
    if !weather.is_valid() {
        return Err(ContractError::malformed_row(
            line,
            format!(
                "weather out of range (sun_altitude {}, cloudiness {})",
                weather.sun_altitude_deg, weather.cloudiness
            ),
        ));
    }

    Ok(SequenceDescriptor::new(seed, map, weather, out_folder))
}
