//! Build settings: the axes that parameterize a build

use kiln_errors::BuildError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target operating system
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Os {
    Linux,
    Macos,
    Windows,
    FreeBsd,
    Android,
    Ios,
    /// Any value kiln has no built-in knowledge of
    Other(String),
}

impl Os {
    /// Operating system kiln itself is running on
    #[must_use]
    pub fn host() -> Self {
        if cfg!(target_os = "macos") {
            Self::Macos
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "freebsd") {
            Self::FreeBsd
        } else if cfg!(target_os = "android") {
            Self::Android
        } else if cfg!(target_os = "ios") {
            Self::Ios
        } else {
            Self::Linux
        }
    }

    /// Parse a name, rejecting values kiln does not know about
    ///
    /// Recipe branch keys go through this so a typo cannot silently
    /// declare a branch that never matches.
    ///
    /// # Errors
    ///
    /// Returns the unrecognized name.
    pub fn parse_known(name: &str) -> Result<Self, String> {
        match Self::from(name.to_string()) {
            Self::Other(other) => Err(other),
            known => Ok(known),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Linux => "linux",
            Self::Macos => "macos",
            Self::Windows => "windows",
            Self::FreeBsd => "freebsd",
            Self::Android => "android",
            Self::Ios => "ios",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for Os {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "linux" => Self::Linux,
            "macos" | "darwin" | "osx" => Self::Macos,
            "windows" | "win32" => Self::Windows,
            "freebsd" => Self::FreeBsd,
            "android" => Self::Android,
            "ios" => Self::Ios,
            _ => Self::Other(value),
        }
    }
}

impl From<Os> for String {
    fn from(value: Os) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for Os {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target CPU architecture
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Arch {
    X86_64,
    X86,
    Armv8,
    Armv7,
    Other(String),
}

impl Arch {
    /// Architecture kiln itself is running on
    #[must_use]
    pub fn host() -> Self {
        if cfg!(target_arch = "aarch64") {
            Self::Armv8
        } else if cfg!(target_arch = "x86") {
            Self::X86
        } else if cfg!(target_arch = "arm") {
            Self::Armv7
        } else {
            Self::X86_64
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::X86_64 => "x86_64",
            Self::X86 => "x86",
            Self::Armv8 => "armv8",
            Self::Armv7 => "armv7",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for Arch {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Self::X86_64,
            "x86" | "i686" => Self::X86,
            "armv8" | "arm64" | "aarch64" => Self::Armv8,
            "armv7" | "arm" => Self::Armv7,
            _ => Self::Other(value),
        }
    }
}

impl From<Arch> for String {
    fn from(value: Arch) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for Arch {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CMake-style build configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BuildType {
    Debug,
    #[default]
    Release,
    RelWithDebInfo,
    MinSizeRel,
}

impl BuildType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "Debug",
            Self::Release => "Release",
            Self::RelWithDebInfo => "RelWithDebInfo",
            Self::MinSizeRel => "MinSizeRel",
        }
    }
}

impl FromStr for BuildType {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "release" => Ok(Self::Release),
            "relwithdebinfo" => Ok(Self::RelWithDebInfo),
            "minsizerel" => Ok(Self::MinSizeRel),
            _ => Err(BuildError::Validation {
                package: String::from("settings"),
                message: format!("unknown build_type: {s}"),
            }),
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiler identity and language level
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Compiler {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// C++ standard the build targets (17, 20, ...)
    #[serde(default = "default_cppstd")]
    pub cppstd: u32,
}

fn default_cppstd() -> u32 {
    17
}

impl Compiler {
    /// Conventional compiler for an operating system
    #[must_use]
    pub fn default_for(os: &Os) -> Self {
        let name = match os {
            Os::Macos | Os::Ios => "apple-clang",
            Os::Windows => "msvc",
            Os::FreeBsd | Os::Android => "clang",
            Os::Linux | Os::Other(_) => "gcc",
        };
        Self {
            name: name.to_string(),
            version: None,
            cppstd: default_cppstd(),
        }
    }
}

impl fmt::Display for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}-{} (c++{})", self.name, version, self.cppstd),
            None => write!(f, "{} (c++{})", self.name, self.cppstd),
        }
    }
}

/// The settings axes that parameterize one build
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Settings {
    pub os: Os,
    pub arch: Arch,
    pub compiler: Compiler,
    #[serde(default)]
    pub build_type: BuildType,
}

impl Settings {
    /// Settings describing the machine kiln runs on
    #[must_use]
    pub fn host() -> Self {
        let os = Os::host();
        Self {
            compiler: Compiler::default_for(&os),
            os,
            arch: Arch::host(),
            build_type: BuildType::Release,
        }
    }

    /// Settings used for tool requirements: they execute on this machine
    /// during the build, so they always target the host platform.
    #[must_use]
    pub fn for_tools(&self) -> Self {
        let host = Self::host();
        Self {
            compiler: if host.os == self.os {
                self.compiler.clone()
            } else {
                host.compiler
            },
            os: host.os,
            arch: host.arch,
            build_type: BuildType::Release,
        }
    }

    /// Whether artifacts built with these settings can execute here
    #[must_use]
    pub fn can_run(&self) -> bool {
        self.os == Os::host() && self.arch == Arch::host()
    }

    #[must_use]
    pub fn with_os(mut self, os: Os) -> Self {
        self.os = os;
        self
    }

    #[must_use]
    pub fn with_arch(mut self, arch: Arch) -> Self {
        self.arch = arch;
        self
    }

    #[must_use]
    pub fn with_build_type(mut self, build_type: BuildType) -> Self {
        self.build_type = build_type;
        self
    }

    #[must_use]
    pub fn with_cppstd(mut self, cppstd: u32) -> Self {
        self.compiler.cppstd = cppstd;
        self
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::host()
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "os={} arch={} compiler={} build_type={}",
            self.os, self.arch, self.compiler, self.build_type
        )
    }
}
