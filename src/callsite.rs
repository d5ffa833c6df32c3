//! Call-site resolution
//!
//! Attributes each query to the application code that issued it. The stack is
//! walked from the innermost frame outward, skipping frames that belong to the
//! ORM, the driver, the Rust runtime or this profiler; the first remaining frame
//! is the call site.
//!
//! Identities are FNV-1a hashes of `(file, line, function)`, so the same
//! location always maps to the same [`CallSiteId`].

use crate::config::ProfilerConfig;
use crate::error::ProfilerError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::ffi::c_void;
use std::fmt;
use std::hash::Hasher;

/// Prefixes that are never a call site
const BUILTIN_EXCLUSIONS: [&str; 7] = [
    "querylens::",
    "backtrace::",
    "std::",
    "core::",
    "alloc::",
    "dashmap::",
    "__rust",
];

/// Label of the sentinel call site
pub const UNKNOWN_LABEL: &str = "<unknown>";

/// Opaque call-site identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallSiteId(pub u64);

impl CallSiteId {
    /// Identity of [`CallSite::unknown`]
    pub const UNKNOWN: CallSiteId = CallSiteId(0);
}

impl fmt::Display for CallSiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// One stack frame, as far as call-site resolution cares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Module path, e.g. `my_app::repo`
    pub module: String,
    /// Fully qualified function path, e.g. `my_app::repo::load_users`
    pub function: String,
    pub file: String,
    pub line: u32,
}

impl Frame {
    /// Build a frame, deriving the module path from the function path
    pub fn new(function: impl Into<String>, file: impl Into<String>, line: u32) -> Self {
        let function = function.into();
        Self {
            module: module_of(&function),
            function,
            file: file.into(),
            line,
        }
    }
}

/// Application location that issued a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub id: CallSiteId,
    /// Human-readable `function (file:line)`
    pub label: String,
    pub file: String,
    pub line: u32,
    pub function: String,
}

impl CallSite {
    /// Sentinel for stacks with no application frame
    pub fn unknown() -> Self {
        Self {
            id: CallSiteId::UNKNOWN,
            label: UNKNOWN_LABEL.to_string(),
            file: String::new(),
            line: 0,
            function: String::new(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.id == CallSiteId::UNKNOWN
    }

    /// Whether both sites name the same source location, regardless of id
    pub fn same_location(&self, other: &CallSite) -> bool {
        self.line == other.line && self.file == other.file && self.function == other.function
    }

    fn from_frame(frame: &Frame) -> Self {
        Self {
            id: call_site_id(&frame.file, frame.line, &frame.function),
            label: format!("{} ({}:{})", frame.function, frame.file, frame.line),
            file: frame.file.clone(),
            line: frame.line,
            function: frame.function.clone(),
        }
    }
}

/// Generate the deterministic identity for a source location
///
/// # Example
/// ```
/// use querylens::callsite::call_site_id;
///
/// let a = call_site_id("src/repo.rs", 42, "app::repo::load");
/// let b = call_site_id("src/repo.rs", 42, "app::repo::load");
/// assert_eq!(a, b);
/// assert_ne!(a, call_site_id("src/repo.rs", 43, "app::repo::load"));
/// ```
pub fn call_site_id(file: &str, line: u32, function: &str) -> CallSiteId {
    let mut hasher = fnv::FnvHasher::default();

    // Hash format: "file::line::function"
    hasher.write(file.as_bytes());
    hasher.write(b"::");
    hasher.write(&line.to_le_bytes());
    hasher.write(b"::");
    hasher.write(function.as_bytes());

    match hasher.finish() {
        // 0 is reserved for the unknown sentinel
        0 => CallSiteId(1),
        id => CallSiteId(id),
    }
}

/// Source of call stacks for events that arrive without one
///
/// The default implementation walks the current thread's synchronous stack.
/// Integrations that want to attribute queries across task boundaries can
/// supply a provider that stitches in the spawning task's frames.
pub trait StackProvider: Send + Sync {
    /// Capture at most `max_depth` frames, innermost first
    fn capture(&self, max_depth: usize) -> Vec<Frame>;
}

/// [`StackProvider`] backed by the `backtrace` crate
///
/// Symbolization is the expensive part of a stack walk, so resolved frames are
/// cached per instruction pointer for the provider's lifetime.
#[derive(Debug, Default)]
pub struct BacktraceProvider {
    symbols: DashMap<usize, Vec<Frame>>,
}

impl BacktraceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn symbolize(&self, ip: usize) -> Vec<Frame> {
        if let Some(cached) = self.symbols.get(&ip) {
            return cached.value().clone();
        }

        // One instruction pointer may expand to several inlined frames
        let mut frames = Vec::new();
        backtrace::resolve(ip as *mut c_void, |symbol| {
            // `{:#}` renders the demangled name without the hash suffix
            let function = symbol
                .name()
                .map(|name| format!("{:#}", name))
                .unwrap_or_default();
            let file = symbol
                .filename()
                .map(|path| path.display().to_string())
                .unwrap_or_default();
            frames.push(Frame::new(function, file, symbol.lineno().unwrap_or(0)));
        });

        self.symbols.insert(ip, frames.clone());
        frames
    }
}

impl StackProvider for BacktraceProvider {
    fn capture(&self, max_depth: usize) -> Vec<Frame> {
        let mut ips = Vec::with_capacity(max_depth.min(32));
        backtrace::trace(|raw| {
            let ip = raw.ip() as usize;
            if ip != 0 {
                ips.push(ip);
            }
            ips.len() < max_depth
        });

        let mut frames = Vec::with_capacity(ips.len());
        for ip in ips {
            frames.extend(self.symbolize(ip));
            if frames.len() >= max_depth {
                frames.truncate(max_depth);
                break;
            }
        }
        frames
    }
}

/// Resolves stacks to call sites, caching each distinct site once
#[derive(Debug)]
pub struct CallSiteResolver {
    exclusions: Vec<String>,
    max_depth: usize,
    sites: DashMap<CallSiteId, CallSite>,
}

impl CallSiteResolver {
    /// Create a resolver with the configured exclusions and depth bound
    pub fn new(config: &ProfilerConfig) -> Self {
        let mut exclusions: Vec<String> =
            BUILTIN_EXCLUSIONS.iter().map(|p| p.to_string()).collect();
        exclusions.extend(config.exclusion_modules.iter().cloned());

        Self {
            exclusions,
            max_depth: config.max_stack_depth,
            sites: DashMap::new(),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Resolve a stack (innermost frame first) to its call site
    ///
    /// Never fails: stacks without an application frame within the depth
    /// bound resolve to [`CallSite::unknown`].
    pub fn resolve(&self, stack: &[Frame]) -> CallSite {
        match self.find_application_frame(stack) {
            Ok(frame) => {
                let site = CallSite::from_frame(frame);
                let cached = self.sites.entry(site.id).or_insert_with(|| site.clone());
                if !cached.same_location(&site) {
                    // Hand back the real location so aggregation can flag the collision
                    tracing::warn!(
                        id = %site.id,
                        cached = %cached.label,
                        resolved = %site.label,
                        "call site identity collision"
                    );
                    return site;
                }
                cached.value().clone()
            }
            Err(err) => {
                tracing::trace!("{}; attributing to {}", err, UNKNOWN_LABEL);
                CallSite::unknown()
            }
        }
    }

    /// Number of distinct call sites resolved so far
    pub fn distinct_sites(&self) -> usize {
        self.sites.len()
    }

    /// Whether a frame belongs to excluded (framework or profiler) code
    pub fn is_excluded(&self, frame: &Frame) -> bool {
        if frame.function.is_empty() && frame.module.is_empty() {
            // Unsymbolized frames carry no attribution value
            return true;
        }
        // `<orm::Model as app::Trait>::method` belongs to the implementing type
        let function = frame
            .function
            .strip_prefix('<')
            .unwrap_or(&frame.function);
        self.exclusions.iter().any(|prefix| {
            frame.module.starts_with(prefix.as_str()) || function.starts_with(prefix.as_str())
        })
    }

    fn find_application_frame<'a>(&self, stack: &'a [Frame]) -> Result<&'a Frame, ProfilerError> {
        if let Some(frame) = stack
            .iter()
            .take(self.max_depth)
            .find(|frame| !self.is_excluded(frame))
        {
            return Ok(frame);
        }

        if stack.len() > self.max_depth {
            Err(ProfilerError::Resolution(format!(
                "no application frame within {} frames",
                self.max_depth
            )))
        } else {
            Err(ProfilerError::Resolution(format!(
                "all {} frames are internal",
                stack.len()
            )))
        }
    }
}

/// Derive the module path of a function path
///
/// `my_app::repo::load_users` becomes `my_app::repo`; closures and trait
/// impls keep their enclosing path.
pub fn module_of(function: &str) -> String {
    let path = function
        .split("::{{closure}}")
        .next()
        .unwrap_or(function)
        .trim_start_matches('<');
    match path.rfind("::") {
        Some(idx) => path[..idx].to_string(),
        None => path.to_string(),
    }
}
