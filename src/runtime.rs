//! Run lifecycle: configuration in, coverage file out.
//!
//! A [`Runtime`] owns the [`Collector`], the resolved codecs and the
//! [`Instrumenter`] built from the configured rules. The agent installs one
//! per process with [`install`]; the native bridge reaches it through
//! [`global`].
//!
//! ```no_run
//! use argcov::codec::CodecRegistry;
//! use argcov::config::Config;
//! use argcov::runtime::Runtime;
//!
//! let config = Config::from_options("output=coverage.txt,serializer=typed").unwrap();
//! let runtime = Runtime::start(config, &CodecRegistry::with_defaults()).unwrap();
//! let session = runtime.session();
//! runtime.collector().record("com.acme.Service", "handle(I)V", "(I)V", vec![5.into()]);
//! session.finish().unwrap();
//! ```

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{debug, info, warn};

use crate::codec::{CodecRegistry, ValueCodec};
use crate::collector::Collector;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::instrument::Instrumenter;
use crate::predicate::{self, ExcludeOwnerPrefix, PredicateExt};
use crate::store::CoverageStore;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

#[derive(Debug)]
pub struct Runtime {
    config: Config,
    collector: Arc<Collector>,
    serializer: Arc<dyn ValueCodec>,
    deserializer: Arc<dyn ValueCodec>,
    instrumenter: Instrumenter,
    saved: AtomicBool,
}

impl Runtime {
    /// Resolves the codecs and member rules and builds the collector. The
    /// input file, if any, is merged in lazily on first use.
    pub fn start(config: Config, codecs: &CodecRegistry) -> Result<Self> {
        let serializer = codecs.resolve(&config.serializer)?;
        let deserializer = codecs.resolve(&config.deserializer)?;

        let rules = predicate::from_rules(&config.include)?;
        let instrumenter =
            Instrumenter::new(rules.and(ExcludeOwnerPrefix::platform())).with_field_coverage(config.fields);

        let collector =
            Arc::new(Collector::new(CoverageStore::new(), config.mode).with_canonical_codec(Arc::clone(&serializer)));
        if let Some(input) = config.input.clone() {
            let codec = Arc::clone(&deserializer);
            collector.set_initializer(move |collector| match CoverageStore::load(&input, codec.as_ref()) {
                Ok(previous) => {
                    info!(path = %input.display(), members = previous.member_count(), "merged previous coverage");
                    collector.merge(previous);
                    Ok(())
                }
                Err(Error::Io(error)) if error.kind() == ErrorKind::NotFound => {
                    debug!(path = %input.display(), "no previous coverage file");
                    Ok(())
                }
                Err(error) => Err(error),
            });
        }

        debug!(
            serializer = serializer.name(),
            deserializer = deserializer.name(),
            mode = ?config.mode,
            "runtime started"
        );
        Ok(Self { config, collector, serializer, deserializer, instrumenter, saved: AtomicBool::new(false) })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    pub fn instrumenter(&self) -> &Instrumenter {
        &self.instrumenter
    }

    pub fn serializer(&self) -> &dyn ValueCodec {
        self.serializer.as_ref()
    }

    pub fn deserializer(&self) -> &dyn ValueCodec {
        self.deserializer.as_ref()
    }

    /// Writes the store to the configured output. Returns the path written,
    /// or `None` when no output is configured.
    pub fn save(&self) -> Result<Option<PathBuf>> {
        let Some(path) = self.config.output.clone() else {
            warn!("no output configured, coverage discarded");
            return Ok(None);
        };
        // an input that was never needed still has to reach the output, and
        // one that could not be read must not be overwritten
        self.collector.initialize()?;
        self.collector.save_to(&path, self.serializer.as_ref())?;
        self.saved.store(true, Ordering::Release);
        let (members, observations) =
            self.collector.with_store(|s| (s.member_count(), s.observation_count()));
        info!(path = %path.display(), members, observations, "coverage saved");
        Ok(Some(path))
    }

    /// True once [`save`](Self::save) has written a file.
    pub fn is_saved(&self) -> bool {
        self.saved.load(Ordering::Acquire)
    }

    pub fn session(&self) -> CoverageSession<'_> {
        CoverageSession { runtime: self, finished: false }
    }
}

/// One run from start to flush. Dropping an unfinished session saves.
#[derive(Debug)]
pub struct CoverageSession<'a> {
    runtime: &'a Runtime,
    finished: bool,
}

impl CoverageSession<'_> {
    pub fn runtime(&self) -> &Runtime {
        self.runtime
    }

    pub fn finish(mut self) -> Result<Option<PathBuf>> {
        self.finished = true;
        self.runtime.save()
    }
}

impl Drop for CoverageSession<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(error) = self.runtime.save() {
            warn!(%error, "failed to save coverage");
        }
    }
}

/// Makes `runtime` the process-wide instance.
pub fn install(runtime: Runtime) -> Result<&'static Runtime> {
    RUNTIME.set(runtime).map_err(|_| Error::AlreadyInstalled)?;
    RUNTIME.get().ok_or(Error::AlreadyInstalled)
}

pub fn global() -> Option<&'static Runtime> {
    RUNTIME.get()
}
