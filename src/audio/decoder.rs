use crate::error::{DetectionError, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{MAX_DURATION_SECS, MIN_DURATION_SECS, TARGET_SAMPLE_RATE};

/// Samples per resampler input chunk
const RESAMPLE_CHUNK: usize = 1024;

/// Mono waveform at a known sample rate
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decodes compressed audio clips into mono waveforms at the target rate
#[derive(Debug, Clone)]
pub struct AudioDecoder {
    target_sample_rate: u32,
}

impl Default for AudioDecoder {
    fn default() -> Self {
        Self::new(TARGET_SAMPLE_RATE)
    }
}

impl AudioDecoder {
    pub fn new(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Decode a base64 payload, validate its duration, then resample
    ///
    /// The duration is measured at the source rate, before resampling. It
    /// matches the resampled length to within one output sample.
    pub fn decode_base64(&self, encoded: &str) -> Result<DecodedAudio> {
        let bytes = decode_base64_payload(encoded)?;
        let native = self.decode_native(&bytes)?;
        validate_duration(native.duration_secs())?;
        self.to_target_rate(native)
    }

    /// Decode raw container bytes (MP3, WAV, ...) without duration checks.
    ///
    /// The bytes are staged in a temporary file that is removed when this
    /// function returns, whatever the outcome.
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<DecodedAudio> {
        let native = self.decode_native(bytes)?;
        self.to_target_rate(native)
    }

    fn decode_native(&self, bytes: &[u8]) -> Result<DecodedAudio> {
        if bytes.is_empty() {
            return Err(DetectionError::InvalidFormat(
                "Audio payload is empty".to_string(),
            ));
        }

        let mut staged = tempfile::Builder::new()
            .prefix("voice-detect-")
            .suffix(".mp3")
            .tempfile()?;
        staged.write_all(bytes)?;
        staged.flush()?;

        let (samples, source_rate) = decode_file(staged.path())?;
        log::debug!(
            "Decoded {} mono samples at {}Hz from {} bytes",
            samples.len(),
            source_rate,
            bytes.len()
        );

        Ok(DecodedAudio {
            samples,
            sample_rate: source_rate,
        })
    }

    fn to_target_rate(&self, audio: DecodedAudio) -> Result<DecodedAudio> {
        if audio.sample_rate == self.target_sample_rate {
            return Ok(audio);
        }
        let samples = resample(&audio.samples, audio.sample_rate, self.target_sample_rate)?;
        Ok(DecodedAudio {
            samples,
            sample_rate: self.target_sample_rate,
        })
    }
}

/// Strip whitespace and an optional `data:<mime>;base64,` prefix, then decode
pub fn decode_base64_payload(encoded: &str) -> Result<Vec<u8>> {
    let trimmed = encoded.trim();
    let body = match trimmed.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| DetectionError::InvalidFormat("Malformed data URL".to_string()))?,
        None => trimmed,
    };
    let compact: String = body.split_whitespace().collect();

    BASE64_STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| DetectionError::InvalidFormat(format!("Invalid Base64 encoding: {}", e)))
}

/// Reject clips outside the accepted duration window
pub fn validate_duration(duration: f64) -> Result<()> {
    if duration < MIN_DURATION_SECS {
        return Err(DetectionError::AudioTooShort(duration));
    }
    if duration > MAX_DURATION_SECS {
        return Err(DetectionError::AudioTooLong(duration));
    }
    Ok(())
}

/// Decode every packet of the first audio track, averaging channels to mono
fn decode_file(path: &Path) -> Result<(Vec<f32>, u32)> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DetectionError::InvalidFormat(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DetectionError::InvalidFormat("No audio track found".to_string()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DetectionError::InvalidFormat(e.to_string()))?;

    let mut mono: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                if mono.is_empty() {
                    return Err(DetectionError::InvalidFormat(e.to_string()));
                }
                log::warn!("Stopping decode after packet error: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => {
                if mono.is_empty() {
                    return Err(DetectionError::InvalidFormat(e.to_string()));
                }
                log::warn!("Stopping decode after decoder error: {}", e);
                break;
            }
        };

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        let channels = spec.channels.count().max(1);

        let buf = sample_buf
            .get_or_insert_with(|| SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        if buf.capacity() < decoded.capacity() * channels {
            *buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        }
        buf.copy_interleaved_ref(decoded);

        mono.extend(
            buf.samples()
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );
    }

    let sample_rate = sample_rate
        .filter(|&rate| rate > 0)
        .ok_or_else(|| DetectionError::InvalidFormat("Unknown sample rate".to_string()))?;
    if mono.is_empty() {
        return Err(DetectionError::InvalidFormat(
            "No audio samples could be decoded".to_string(),
        ));
    }

    Ok((mono, sample_rate))
}

/// Band-limited sinc resampling of a mono signal
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    log::debug!(
        "Resampling {} samples from {}Hz to {}Hz (ratio: {})",
        samples.len(),
        from_rate,
        to_rate,
        ratio
    );

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| {
            DetectionError::ProcessingError(format!("Failed to create resampler: {}", e))
        })?;

    let expected = (samples.len() as f64 * ratio).ceil() as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay);
    let resample_err =
        |e: rubato::ResampleError| DetectionError::ProcessingError(format!("Resampling error: {}", e));

    let mut chunks = samples.chunks_exact(RESAMPLE_CHUNK);
    for chunk in &mut chunks {
        let out = resampler.process(&[chunk], None).map_err(resample_err)?;
        output.extend_from_slice(&out[0]);
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        let out = resampler
            .process_partial(Some(&[rest]), None)
            .map_err(resample_err)?;
        output.extend_from_slice(&out[0]);
    }
    // Flush the filter tail until the delayed output is complete
    while output.len() < expected + delay {
        let out = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(resample_err)?;
        if out[0].is_empty() {
            break;
        }
        output.extend_from_slice(&out[0]);
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);
    Ok(output)
}
