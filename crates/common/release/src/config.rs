// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::PathBuf;

use bon::Builder;
use jiff::SignedDuration;
use smart_default::SmartDefault;

const fn mb(n: u64) -> u64 { n * 1024 * 1024 }

/// Configuration for chunk calculation
#[derive(Debug, Clone, SmartDefault)]
pub struct ChunkingConfig {
    /// Minimum size of each chunk in bytes (default: 5MB)
    #[default(mb(5))]
    pub min_chunk_size:        u64,
    /// Maximum number of chunks (default: 16)
    #[default = 16]
    pub max_chunks:            usize,
    /// Files smaller than this are downloaded without chunking (default: 16MB)
    #[default(mb(16))]
    pub small_file_threshold:  u64,
    /// Files between small and medium thresholds use 2-4 chunks (default:
    /// 128MB)
    #[default(mb(128))]
    pub medium_file_threshold: u64,
}

impl ChunkingConfig {
    /// Calculate the number of chunks for a file of the given size
    #[must_use]
    pub fn calculate_chunks(&self, file_size: u64) -> usize {
        let small_threshold = self.small_file_threshold;
        let medium_threshold = self.medium_file_threshold;
        let min_chunk = self.min_chunk_size;

        if file_size < small_threshold {
            // Small file: no chunking
            1
        } else if file_size < medium_threshold {
            // Medium file: 2-4 chunks
            let chunks = file_size / min_chunk;
            chunks.clamp(2, 4) as usize
        } else {
            // Large file: based on size, capped at max_chunks
            let chunks = file_size / min_chunk;
            #[allow(clippy::cast_possible_truncation)]
            let result = chunks.min(self.max_chunks as u64) as usize;
            result
        }
    }
}

/// Configuration for the downloader
#[derive(Debug, Clone, SmartDefault, Builder)]
pub struct DownloaderConfig {
    /// Chunking configuration
    #[default(ChunkingConfig::default())]
    pub chunking: ChunkingConfig,

    /// Directory to store cached downloads (default: user cache dir /
    /// downloader)
    #[default(dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join("downloader"))]
    pub cache_dir: PathBuf,

    /// Directory for temporary files during download
    #[default(std::env::temp_dir().join("downloader"))]
    pub temp_dir: PathBuf,

    /// Timeout for HTTP requests
    #[default(SignedDuration::from_secs(30))]
    pub timeout: SignedDuration,

    /// Maximum number of retries per chunk
    #[default = 3]
    pub max_retries: usize,

    /// Custom User-Agent header
    pub user_agent: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_calculation_small_file() {
        let config = ChunkingConfig::default();
        // 10MB - should be 1 chunk (below 16MB threshold)
        assert_eq!(config.calculate_chunks(10 * 1024 * 1024), 1);
    }

    #[test]
    fn test_chunk_calculation_medium_file() {
        let config = ChunkingConfig::default();
        // 50MB - should be 2-4 chunks
        let chunks = config.calculate_chunks(50 * 1024 * 1024);
        assert!((2..=4).contains(&chunks));
    }

    #[test]
    fn test_chunk_calculation_large_file() {
        let config = ChunkingConfig::default();
        // 500MB - should be capped at 16 chunks
        let chunks = config.calculate_chunks(500 * 1024 * 1024);
        assert!(chunks <= 16);
        assert!(chunks > 4);
    }
}
