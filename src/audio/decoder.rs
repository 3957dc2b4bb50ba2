// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::debug;

use super::{AudioLoader, DecodedAudio, LoadError};

/// Decodes WAV, AIFF, FLAC, MP3, OGG and the other formats symphonia supports
/// into a single interleaved buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaLoader;

impl SymphoniaLoader {
    pub fn new() -> SymphoniaLoader {
        SymphoniaLoader
    }

    /// Reads the next packet. `Ok(None)` means the stream is exhausted; some
    /// demuxers report the end as a decode error rather than an EOF.
    fn read_next_packet(
        format_reader: &mut dyn FormatReader,
    ) -> Result<Option<Packet>, SymphoniaError> {
        match format_reader.next_packet() {
            Ok(packet) => Ok(Some(packet)),
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Ok(None)
            }
            Err(SymphoniaError::DecodeError(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Decodes every packet for the track into interleaved f32 samples. Returns the
    /// samples and the channel count observed in the decoded buffers.
    fn decode_track(
        path: &Path,
        format_reader: &mut dyn FormatReader,
        decoder: &mut dyn Decoder,
        track_id: u32,
    ) -> Result<(Vec<f32>, usize), LoadError> {
        let mut samples = Vec::new();
        let mut channels = 0;

        loop {
            let packet = match Self::read_next_packet(format_reader) {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(source) => {
                    return Err(LoadError::Decode {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!(path = ?path, error = e, "Skipping undecodable packet");
                    continue;
                }
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(source) => {
                    return Err(LoadError::Decode {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            };

            let packet_channels = Self::append_as_f32(decoded, &mut samples);
            if packet_channels > 0 {
                channels = packet_channels;
            }
        }

        Ok((samples, channels))
    }

    /// Appends a decoded buffer to the output as interleaved f32 and returns its channel count.
    fn append_as_f32(decoded: AudioBufferRef, output: &mut Vec<f32>) -> usize {
        match decoded {
            AudioBufferRef::F32(buf) => Self::interleave(&buf, output, |s| s),
            AudioBufferRef::F64(buf) => Self::interleave(&buf, output, |s| s as f32),
            AudioBufferRef::S8(buf) => Self::interleave(&buf, output, Self::scale_s8),
            AudioBufferRef::S16(buf) => Self::interleave(&buf, output, Self::scale_s16),
            AudioBufferRef::S24(buf) => {
                Self::interleave(&buf, output, |s| Self::scale_s24(s.inner()))
            }
            AudioBufferRef::S32(buf) => Self::interleave(&buf, output, Self::scale_s32),
            AudioBufferRef::U8(buf) => Self::interleave(&buf, output, Self::scale_u8),
            AudioBufferRef::U16(buf) => Self::interleave(&buf, output, Self::scale_u16),
            AudioBufferRef::U24(buf) => {
                Self::interleave(&buf, output, |s| Self::scale_u24(s.inner()))
            }
            AudioBufferRef::U32(buf) => Self::interleave(&buf, output, Self::scale_u32),
        }
    }

    fn interleave<T, F>(buf: &AudioBuffer<T>, output: &mut Vec<f32>, convert: F) -> usize
    where
        T: symphonia::core::sample::Sample,
        F: Fn(T) -> f32,
    {
        let frames = buf.frames();
        let channels = buf.spec().channels.count();
        let planes = buf.planes();
        let planes = planes.planes();
        output.reserve(frames * channels);
        for frame_idx in 0..frames {
            for plane in planes.iter().take(channels) {
                output.push(convert(plane[frame_idx]));
            }
        }
        channels
    }

    #[inline]
    pub(crate) fn scale_s8(sample: i8) -> f32 {
        sample as f32 / (1i64 << 7) as f32
    }

    #[inline]
    pub(crate) fn scale_s16(sample: i16) -> f32 {
        sample as f32 / (1i64 << 15) as f32
    }

    #[inline]
    pub(crate) fn scale_s24(sample: i32) -> f32 {
        sample as f32 / (1i64 << 23) as f32
    }

    #[inline]
    pub(crate) fn scale_s32(sample: i32) -> f32 {
        sample as f32 / (1i64 << 31) as f32
    }

    #[inline]
    pub(crate) fn scale_u8(sample: u8) -> f32 {
        (sample as f32 / u8::MAX as f32) * 2.0 - 1.0
    }

    #[inline]
    pub(crate) fn scale_u16(sample: u16) -> f32 {
        (sample as f32 / u16::MAX as f32) * 2.0 - 1.0
    }

    #[inline]
    pub(crate) fn scale_u24(sample: u32) -> f32 {
        let max = (1u32 << 24) - 1;
        (sample as f32 / max as f32) * 2.0 - 1.0
    }

    #[inline]
    pub(crate) fn scale_u32(sample: u32) -> f32 {
        (sample as f32 / u32::MAX as f32) * 2.0 - 1.0
    }
}

impl AudioLoader for SymphoniaLoader {
    fn load(&self, path: &Path) -> Result<DecodedAudio, LoadError> {
        let file = File::open(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();
        let probed = get_probe()
            .format(&hint, mss, &fmt_opts, &meta_opts)
            .map_err(|e| LoadError::Unsupported {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let mut format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| LoadError::Unsupported {
                path: path.to_path_buf(),
                reason: "no audio track found".to_string(),
            })?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params.sample_rate.ok_or_else(|| LoadError::Unsupported {
            path: path.to_path_buf(),
            reason: "sample rate not specified".to_string(),
        })?;

        let decoder_opts: DecoderOptions = Default::default();
        let mut decoder =
            get_codecs()
                .make(&params, &decoder_opts)
                .map_err(|e| LoadError::Unsupported {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;

        let (samples, decoded_channels) =
            Self::decode_track(path, format_reader.as_mut(), decoder.as_mut(), track_id)?;

        // Prefer the channel count seen in decoded buffers; container metadata can be absent.
        let channels = if decoded_channels > 0 {
            decoded_channels as u16
        } else {
            params.channels.map(|c| c.count() as u16).unwrap_or(1)
        };

        if samples.is_empty() {
            return Err(LoadError::Empty(path.to_path_buf()));
        }

        debug!(
            path = ?path,
            sample_rate,
            channels,
            frames = samples.len() / channels as usize,
            "Decoded audio"
        );

        Ok(DecodedAudio::new(samples, sample_rate, channels))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::testutil::{write_wav, write_wav_with_bits};

    #[test]
    fn test_scaling_helpers() {
        assert_eq!(-1.0, SymphoniaLoader::scale_s16(i16::MIN));
        assert_eq!(0.5, SymphoniaLoader::scale_s16(1 << 14));
        assert_eq!(-1.0, SymphoniaLoader::scale_s8(i8::MIN));
        assert_eq!(-1.0, SymphoniaLoader::scale_s24(-(1 << 23)));
        assert_eq!(-1.0, SymphoniaLoader::scale_u8(0));
        assert_eq!(1.0, SymphoniaLoader::scale_u8(u8::MAX));
    }

    #[test]
    fn test_load_16bit_wav() {
        let tempdir = tempdir().unwrap();
        let wav_path = tempdir.path().join("test_16bit.wav");
        let samples: Vec<i16> = vec![1000, -2000, 3000, -4000, 5000];
        write_wav_with_bits(wav_path.clone(), vec![samples], 44100, 16).unwrap();

        let audio = SymphoniaLoader::new().load(&wav_path).unwrap();
        assert_eq!(44100, audio.sample_rate());
        assert_eq!(1, audio.channels());
        assert_eq!(5, audio.frames());

        let expected = [1000.0, -2000.0, 3000.0, -4000.0, 5000.0];
        for (actual, expected) in audio.samples().iter().zip(expected.iter()) {
            assert!((actual - expected / 32768.0).abs() < 0.0001);
        }
    }

    #[test]
    fn test_load_stereo_float_wav() {
        let tempdir = tempdir().unwrap();
        let wav_path = tempdir.path().join("stereo.wav");
        write_wav(
            wav_path.clone(),
            vec![vec![0.5f32, 0.25], vec![-0.5f32, -0.25]],
            48000,
        )
        .unwrap();

        let audio = SymphoniaLoader::new().load(&wav_path).unwrap();
        assert_eq!(2, audio.channels());
        assert_eq!(48000, audio.sample_rate());
        assert_eq!(2, audio.frames());
    }

    #[test]
    fn test_load_missing_file() {
        let tempdir = tempdir().unwrap();
        let result = SymphoniaLoader::new().load(&tempdir.path().join("missing.wav"));
        assert!(matches!(result, Err(LoadError::Io { .. })));
    }

    #[test]
    fn test_load_garbage_file() {
        let tempdir = tempdir().unwrap();
        let path = tempdir.path().join("garbage.wav");
        std::fs::write(&path, b"this is not audio at all").unwrap();
        let result = SymphoniaLoader::new().load(&path);
        assert!(matches!(result, Err(LoadError::Unsupported { .. })));
    }
}
