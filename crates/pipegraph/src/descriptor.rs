//! Pipe descriptors
//!
//! A pipe descriptor states what kind of resource backs a pipe: its size (fixed, or
//! relative to the output surface), layer count, pixel format and dimensionality.
//! Surface-relative sizes are expressed as rational scale factors such as "1/2" and
//! are only turned into pixel extents when the registry materializes the pipe.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Represents a rational scale factor as a fraction
///
/// Used to express the size of a pipe relative to the output surface, supporting
/// both simple integers (e.g., "2") and fractions (e.g., "1/2").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ScaleFactor {
    /// The numerator of the fraction
    pub numerator: u32,
    /// The denominator of the fraction
    pub denominator: u32,
}

impl ScaleFactor {
    /// The unit scale factor (same size as the surface)
    pub const ONE: Self = Self { numerator: 1, denominator: 1 };

    /// Creates a new scale factor from numerator and denominator
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self { numerator, denominator }
    }

    /// Applies the scale factor to a surface dimension
    ///
    /// Uses integer arithmetic so that the same surface always yields the same extent.
    /// The result is floored and clamped to at least one pixel.
    pub fn apply(&self, extent: u32) -> u32 {
        if self.denominator == 0 {
            return 1;
        }
        let scaled = u64::from(extent) * u64::from(self.numerator) / u64::from(self.denominator);
        scaled.clamp(1, u64::from(u32::MAX)) as u32
    }
}

impl FromStr for ScaleFactor {
    type Err = ScaleFactorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((numerator, denominator)) = s.split_once('/') {
            if denominator.contains('/') {
                return Err(ScaleFactorParseError::InvalidFormat(s.to_string()));
            }

            let numerator = numerator.trim().parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidNumerator(s.to_string()))?;
            let denominator = denominator.trim().parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidDenominator(s.to_string()))?;

            if denominator == 0 {
                return Err(ScaleFactorParseError::ZeroDenominator);
            }

            Ok(ScaleFactor::new(numerator, denominator))
        } else {
            let numerator = s.parse::<u32>().map_err(|_| ScaleFactorParseError::InvalidNumerator(s.to_string()))?;
            Ok(ScaleFactor::new(numerator, 1))
        }
    }
}

impl fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

impl<'de> Deserialize<'de> for ScaleFactor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error types for scale factor parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScaleFactorParseError {
    /// The format is not recognized (should be "n" or "n/d")
    #[error("invalid scale factor format '{0}'")]
    InvalidFormat(String),
    /// The numerator is not a valid integer
    #[error("invalid numerator in scale factor '{0}'")]
    InvalidNumerator(String),
    /// The denominator is not a valid integer
    #[error("invalid denominator in scale factor '{0}'")]
    InvalidDenominator(String),
    /// The denominator is zero (division by zero)
    #[error("scale factor denominator cannot be zero")]
    ZeroDenominator,
}

/// Dimensions of the output surface in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Height divided by width, used to lay out thumbnails
    pub fn aspect(&self) -> f64 {
        if self.width == 0 {
            return 1.0;
        }
        f64::from(self.height) / f64::from(self.width)
    }
}

impl Default for SurfaceSize {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

impl fmt::Display for SurfaceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for SurfaceSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s.split_once(|c: char| c.eq_ignore_ascii_case(&'x')).ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
        let width = width.trim().parse::<u32>().map_err(|e| format!("invalid width '{width}': {e}"))?;
        let height = height.trim().parse::<u32>().map_err(|e| format!("invalid height '{height}': {e}"))?;
        if width == 0 || height == 0 {
            return Err(format!("surface size must be non-zero, got '{s}'"));
        }
        Ok(Self::new(width, height))
    }
}

/// How the extent of a pipe is specified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipeSize {
    /// A fixed extent in pixels (or elements for buffer pipes), independent of the surface
    Fixed { width: u32, height: u32 },
    /// An extent derived from the current surface size
    SurfaceRelative { width: ScaleFactor, height: ScaleFactor },
}

impl PipeSize {
    /// Full surface resolution
    pub const FULL: Self = Self::SurfaceRelative {
        width: ScaleFactor::ONE,
        height: ScaleFactor::ONE,
    };

    /// Resolves this size against a surface, yielding (width, height) in pixels
    pub fn resolve(&self, surface: SurfaceSize) -> (u32, u32) {
        match *self {
            Self::Fixed { width, height } => (width.max(1), height.max(1)),
            Self::SurfaceRelative { width, height } => (width.apply(surface.width), height.apply(surface.height)),
        }
    }
}

/// Semantic kind of a pipe's pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipeKind {
    Color,
    Depth,
}

/// Pixel format of a pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipeFormat {
    R8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    R16Float,
    Rg16Float,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgba32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl PipeFormat {
    /// Returns whether this format stores color or depth data
    pub fn kind(&self) -> PipeKind {
        match self {
            Self::Depth32Float | Self::Depth24PlusStencil8 => PipeKind::Depth,
            _ => PipeKind::Color,
        }
    }

    /// Size of one texel (or buffer element) in bytes
    pub fn bytes_per_texel(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::R16Float => 2,
            Self::Rgba8Unorm | Self::Rgba8UnormSrgb | Self::Rg16Float | Self::R32Float | Self::Depth32Float | Self::Depth24PlusStencil8 => 4,
            Self::Rgba16Float | Self::Rg32Float => 8,
            Self::Rgba32Float => 16,
        }
    }
}

/// Dimensionality of the resource backing a pipe
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipeDimension {
    /// A single 2D image
    #[default]
    D2,
    /// A stack of 2D layers
    D2Array,
    /// A volume texture whose depth is the layer count
    D3,
    /// An opaque buffer texture; width counts elements
    Buffer,
}

/// Attributes of the resource bound to a pipe name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeDescriptor {
    /// Extent specification
    pub size: PipeSize,
    /// Array layers (or depth for 3D images)
    pub layers: u32,
    /// Pixel format
    pub format: PipeFormat,
    /// Dimensionality
    pub dimension: PipeDimension,
}

impl PipeDescriptor {
    /// A full-resolution single-layer color target
    pub fn color(format: PipeFormat) -> Self {
        Self {
            size: PipeSize::FULL,
            layers: 1,
            format,
            dimension: PipeDimension::D2,
        }
    }

    /// A full-resolution depth target
    pub fn depth(format: PipeFormat) -> Self {
        Self::color(format)
    }

    /// An opaque buffer texture holding `elements` texels
    pub fn buffer(format: PipeFormat, elements: u32) -> Self {
        Self {
            size: PipeSize::Fixed { width: elements, height: 1 },
            layers: 1,
            format,
            dimension: PipeDimension::Buffer,
        }
    }

    /// Replaces the size with a surface-relative one
    pub fn scaled(mut self, width: ScaleFactor, height: ScaleFactor) -> Self {
        self.size = PipeSize::SurfaceRelative { width, height };
        self
    }

    /// Replaces the size with a fixed extent
    pub fn fixed(mut self, width: u32, height: u32) -> Self {
        self.size = PipeSize::Fixed { width, height };
        self
    }

    /// Sets the layer count and the matching dimensionality
    pub fn layered(mut self, layers: u32, dimension: PipeDimension) -> Self {
        self.layers = layers;
        self.dimension = dimension;
        self
    }

    /// Returns true when the extent depends on the surface size
    pub fn is_surface_relative(&self) -> bool {
        matches!(self.size, PipeSize::SurfaceRelative { .. })
    }

    /// Computes the concrete resource attributes for a given surface
    pub fn resolve(&self, surface: SurfaceSize) -> ResourceInfo {
        let (width, height) = self.size.resolve(surface);
        ResourceInfo {
            width,
            height,
            layers: self.layers.max(1),
            format: self.format,
            dimension: self.dimension,
        }
    }
}

/// Concrete attributes of a materialized resource
///
/// This is what backends allocate from and what inspection tooling displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceInfo {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub format: PipeFormat,
    pub dimension: PipeDimension,
}

impl ResourceInfo {
    /// Whether a thumbnail of this resource can be shown
    ///
    /// Multi-layer images, 3D images and buffer textures are skipped.
    pub fn is_inspectable(&self) -> bool {
        self.layers <= 1 && matches!(self.dimension, PipeDimension::D2)
    }

    /// Approximate memory footprint in bytes
    pub fn byte_size(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * u64::from(self.layers) * u64::from(self.format.bytes_per_texel())
    }
}
