// nvmap ioctl trace replay
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use std::{fmt::Debug, path::PathBuf, process::exit};

use clap::Parser;
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use hle_nvmap::{
    protocol::{
        NvMapAlloc, NvMapCommand, NvMapCreate, NvMapFree, NvMapFromId, NvMapGetId, NvMapParam,
    },
    ConfigError, IoctlBuffers, NvMapConfig, NvMapService, NvResult, ProcessId,
};
use log::{error, info};
use serde::Deserialize;
use thiserror::Error as ThisError;
use vm_memory::{ByteValued, Bytes, GuestAddress, GuestMemoryError, GuestMemoryMmap};

const SCRATCH_MEM_SIZE: usize = 0x10000;
const SCRATCH_BUFFERS: IoctlBuffers =
    IoctlBuffers::new(GuestAddress(0x1000), GuestAddress(0x2000));

type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError)]
enum Error {
    #[error("Failed to load trace file: {0}")]
    TraceLoadFailed(Box<figment::Error>),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(ConfigError),
    #[error("Could not create scratch guest memory: {0}")]
    CouldNotCreateGuestMemory(String),
    #[error("Scratch guest memory access failed: {0}")]
    GuestMemoryAccess(GuestMemoryError),
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct NvMapArgs {
    /// YAML trace of nvmap ioctls to replay.
    #[clap(short, long, value_name = "FILE")]
    trace: PathBuf,

    /// Page size of the emulated GPU address space, overrides the trace file.
    #[clap(long)]
    page_size: Option<u32>,
}

/// One operation of a trace, as written in the YAML file.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
enum TraceOp {
    Init,
    Unload,
    Create {
        size: u32,
    },
    FromId {
        id: u32,
    },
    Alloc {
        handle: u32,
        #[serde(default)]
        address: u64,
        #[serde(default)]
        align: u32,
        #[serde(default)]
        kind: u8,
    },
    Free {
        handle: u32,
    },
    Param {
        handle: u32,
        param: u32,
    },
    GetId {
        handle: u32,
    },
    /// Any command word, with zeroed buffers.
    Raw {
        command: u32,
    },
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
struct TraceRequest {
    process: u64,
    #[serde(flatten)]
    op: TraceOp,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TraceFile {
    page_size: Option<u32>,
    heap_base: Option<u32>,
    requests: Vec<TraceRequest>,
}

#[derive(Debug, PartialEq)]
struct Trace {
    config: NvMapConfig,
    requests: Vec<TraceRequest>,
}

impl TryFrom<NvMapArgs> for Trace {
    type Error = Error;

    fn try_from(args: NvMapArgs) -> Result<Self> {
        let file: TraceFile = Figment::new()
            .merge(Yaml::file(&args.trace))
            .extract()
            .map_err(|e| Error::TraceLoadFailed(Box::new(e)))?;

        let defaults = NvMapConfig::default();
        let config = NvMapConfig::new(
            args.page_size.or(file.page_size).unwrap_or(defaults.page_size()),
            file.heap_base.unwrap_or(defaults.heap_base()),
        )
        .map_err(Error::InvalidConfig)?;

        Ok(Trace {
            config,
            requests: file.requests,
        })
    }
}

/// Outcome of one replayed request.
#[derive(Debug, PartialEq)]
struct Outcome {
    result: NvResult,
    response: Option<String>,
}

impl Outcome {
    fn lifecycle() -> Self {
        Self {
            result: NvResult::Success,
            response: None,
        }
    }
}

struct Replayer {
    service: NvMapService,
    memory: GuestMemoryMmap,
}

impl Replayer {
    fn new(config: NvMapConfig) -> Result<Self> {
        let memory = GuestMemoryMmap::<()>::from_ranges(&[(GuestAddress(0), SCRATCH_MEM_SIZE)])
            .map_err(|e| Error::CouldNotCreateGuestMemory(format!("{e:?}")))?;

        Ok(Self {
            service: NvMapService::new(config),
            memory,
        })
    }

    /// Places `request` in the scratch input buffer and issues `cmd`.
    fn issue<T: ByteValued + Debug>(
        &self,
        process: ProcessId,
        cmd: u32,
        request: T,
    ) -> Result<Outcome> {
        self.memory
            .write_obj(request, SCRATCH_BUFFERS.input)
            .map_err(Error::GuestMemoryAccess)?;

        let result = self
            .service
            .ioctl(process, &self.memory, SCRATCH_BUFFERS, cmd);

        let response = match result {
            NvResult::Success => {
                let response: T = self
                    .memory
                    .read_obj(SCRATCH_BUFFERS.output)
                    .map_err(Error::GuestMemoryAccess)?;
                Some(format!("{response:?}"))
            }
            _ => None,
        };

        Ok(Outcome { result, response })
    }

    fn replay(&self, request: &TraceRequest) -> Result<Outcome> {
        let process = ProcessId(request.process);
        let cmd = |command: NvMapCommand| u32::from(command.opcode());

        match request.op {
            TraceOp::Init => {
                self.service.initialize_process(process);
                Ok(Outcome::lifecycle())
            }
            TraceOp::Unload => {
                self.service.unload_process(process);
                Ok(Outcome::lifecycle())
            }
            TraceOp::Create { size } => self.issue(
                process,
                cmd(NvMapCommand::Create),
                NvMapCreate {
                    size: size.into(),
                    ..Default::default()
                },
            ),
            TraceOp::FromId { id } => self.issue(
                process,
                cmd(NvMapCommand::FromId),
                NvMapFromId {
                    id: id.into(),
                    ..Default::default()
                },
            ),
            TraceOp::Alloc {
                handle,
                address,
                align,
                kind,
            } => self.issue(
                process,
                cmd(NvMapCommand::Alloc),
                NvMapAlloc {
                    handle: handle.into(),
                    align: align.into(),
                    kind,
                    address: address.into(),
                    ..Default::default()
                },
            ),
            TraceOp::Free { handle } => self.issue(
                process,
                cmd(NvMapCommand::Free),
                NvMapFree {
                    handle: handle.into(),
                    ..Default::default()
                },
            ),
            TraceOp::Param { handle, param } => self.issue(
                process,
                cmd(NvMapCommand::Param),
                NvMapParam {
                    handle: handle.into(),
                    param: param.into(),
                    ..Default::default()
                },
            ),
            TraceOp::GetId { handle } => self.issue(
                process,
                cmd(NvMapCommand::GetId),
                NvMapGetId {
                    handle: handle.into(),
                    ..Default::default()
                },
            ),
            TraceOp::Raw { command } => self.issue(process, command, [0u8; 32]),
        }
    }
}

fn run(args: NvMapArgs) -> Result<()> {
    let trace = Trace::try_from(args)?;
    info!(
        "Replaying {} requests with {:?}",
        trace.requests.len(),
        trace.config
    );

    let replayer = Replayer::new(trace.config)?;
    for (index, request) in trace.requests.iter().enumerate() {
        let outcome = replayer.replay(request)?;
        match outcome.response {
            Some(response) => println!(
                "{index}: pid {} {:?} -> {} {response}",
                request.process, request.op, outcome.result
            ),
            None => println!(
                "{index}: pid {} {:?} -> {}",
                request.process, request.op, outcome.result
            ),
        }
    }

    Ok(())
}

fn main() {
    env_logger::init();

    if let Err(e) = run(NvMapArgs::parse()) {
        error!("{e}");
        exit(1);
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write, path::Path};

    use assert_matches::assert_matches;
    use tempfile::tempdir;

    use super::*;

    impl NvMapArgs {
        fn from_file(trace: &Path, page_size: Option<u32>) -> Self {
            NvMapArgs {
                trace: trace.to_path_buf(),
                page_size,
            }
        }
    }

    const TRACE: &str = "heap_base: 536870912
requests:
  - process: 1
    op: init
  - process: 1
    op: create
    size: 6144
  - process: 1
    op: alloc
    handle: 1
    address: 2147483648
    align: 16
    kind: 7
  - process: 1
    op: param
    handle: 1
    param: 1
  - process: 1
    op: free
    handle: 1
  - process: 2
    op: raw
    command: 3221750169
  - process: 1
    op: unload
";

    fn write_trace(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("trace.yaml");
        let mut yaml = File::create(&path).unwrap();
        yaml.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_trace_from_file() {
        let test_dir = tempdir().expect("Could not create a temp test directory.");
        let path = write_trace(test_dir.path(), TRACE);

        let trace = Trace::try_from(NvMapArgs::from_file(&path, None)).unwrap();

        assert_eq!(trace.config, NvMapConfig::new(0x1000, 0x2000_0000).unwrap());
        assert_eq!(trace.requests.len(), 7);
        assert_eq!(
            trace.requests[2],
            TraceRequest {
                process: 1,
                op: TraceOp::Alloc {
                    handle: 1,
                    address: 0x8000_0000,
                    align: 16,
                    kind: 7,
                },
            }
        );
        assert_eq!(trace.requests[6].op, TraceOp::Unload);

        test_dir.close().unwrap();
    }

    #[test]
    fn test_page_size_override() {
        let test_dir = tempdir().expect("Could not create a temp test directory.");
        let path = write_trace(test_dir.path(), TRACE);

        let trace = Trace::try_from(NvMapArgs::from_file(&path, Some(0x10000))).unwrap();
        assert_eq!(trace.config.page_size(), 0x10000);
        assert_eq!(trace.config.heap_base(), 0x2000_0000);

        assert_matches!(
            Trace::try_from(NvMapArgs::from_file(&path, Some(0x3000))),
            Err(Error::InvalidConfig(ConfigError::InvalidPageSize(0x3000)))
        );

        test_dir.close().unwrap();
    }

    #[test]
    fn test_invalid_page_size_in_file() {
        let test_dir = tempdir().expect("Could not create a temp test directory.");
        let path = write_trace(test_dir.path(), "page_size: 100\nrequests: []\n");

        assert_matches!(
            Trace::try_from(NvMapArgs::from_file(&path, None)),
            Err(Error::InvalidConfig(ConfigError::InvalidPageSize(100)))
        );

        test_dir.close().unwrap();
    }

    #[test]
    fn test_config_keys_in_file() {
        let test_dir = tempdir().expect("Could not create a temp test directory.");
        let path = write_trace(test_dir.path(), "page_size: 65536\nheap_base: 4096\nrequests: []\n");

        let trace = Trace::try_from(NvMapArgs::from_file(&path, None)).unwrap();
        assert_eq!(trace.config, NvMapConfig::new(0x10000, 0x1000).unwrap());
        assert!(trace.requests.is_empty());

        test_dir.close().unwrap();
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let test_dir = tempdir().expect("Could not create a temp test directory.");
        let path = write_trace(test_dir.path(), "config:\n  page_size: 65536\nrequests: []\n");

        assert_matches!(
            Trace::try_from(NvMapArgs::from_file(&path, None)),
            Err(Error::TraceLoadFailed(_))
        );

        test_dir.close().unwrap();
    }

    #[test]
    fn test_missing_trace_file() {
        let args = NvMapArgs::from_file(Path::new("/proc/nvmap/trace/not/present.yaml"), None);

        assert_matches!(Trace::try_from(args), Err(Error::TraceLoadFailed(_)));
    }

    #[test]
    fn test_replay() {
        let test_dir = tempdir().expect("Could not create a temp test directory.");
        let path = write_trace(test_dir.path(), TRACE);
        let trace = Trace::try_from(NvMapArgs::from_file(&path, None)).unwrap();
        let replayer = Replayer::new(trace.config).unwrap();

        let results: Vec<NvResult> = trace
            .requests
            .iter()
            .map(|request| replayer.replay(request).unwrap().result)
            .collect();

        assert_eq!(
            results,
            vec![
                NvResult::Success,
                NvResult::Success,
                NvResult::Success,
                NvResult::Success,
                NvResult::Success,
                NvResult::NotSupported,
                NvResult::Success,
            ]
        );
        assert!(replayer.service.registry().is_empty());

        test_dir.close().unwrap();
    }

    #[test]
    fn test_replay_param_response() {
        let replayer = Replayer::new(NvMapConfig::default()).unwrap();
        let create = TraceRequest {
            process: 4,
            op: TraceOp::Create { size: 0x1800 },
        };
        let query = TraceRequest {
            process: 4,
            op: TraceOp::Param {
                handle: 1,
                param: 1,
            },
        };

        replayer.replay(&create).unwrap();
        let outcome = replayer.replay(&query).unwrap();

        assert_eq!(outcome.result, NvResult::Success);
        let response: NvMapParam = replayer.memory.read_obj(SCRATCH_BUFFERS.output).unwrap();
        assert_eq!(u32::from(response.result), 0x2000);
        assert!(outcome.response.is_some());
    }
}
