mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::{mp3_base64, tone, wav_base64, wav_bytes, MP3_FRAME_BYTES, MP3_TONE};
use voice_detect_rs::audio::AudioDecoder;
use voice_detect_rs::error::{DetectionError, ErrorCode};

#[test]
fn test_stereo_44k_wav_is_mono_16k() {
    let samples = tone(440.0, 2.0, 44100);
    let encoded = STANDARD.encode(wav_bytes(&samples, 44100, 2));

    let audio = AudioDecoder::default().decode_base64(&encoded).unwrap();
    assert_eq!(audio.sample_rate, 16000);
    assert!(
        (audio.duration_secs() - 2.0).abs() < 0.01,
        "duration was {}",
        audio.duration_secs()
    );
    let peak = audio.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak > 0.5 && peak <= 1.0, "peak was {}", peak);
}

#[test]
fn test_mp3_is_resampled_to_16k() {
    let audio = AudioDecoder::default().decode_base64(&mp3_base64()).unwrap();
    assert_eq!(audio.sample_rate, 16000);
    assert!(
        (1.7..=1.9).contains(&audio.duration_secs()),
        "duration was {}",
        audio.duration_secs()
    );
    assert!(audio.samples.iter().all(|s| s.is_finite()));
    let peak = audio.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    assert!(peak > 1e-3, "peak was {}", peak);
}

#[test]
fn test_mp3_data_url_is_accepted() {
    let encoded = format!("data:audio/mpeg;base64,{}", mp3_base64());
    let audio = AudioDecoder::default().decode_base64(&encoded).unwrap();
    assert_eq!(audio.sample_rate, 16000);
}

#[test]
fn test_truncated_mp3_is_too_short() {
    // 20 frames of 1152 samples at 32 kHz
    let encoded = STANDARD.encode(&MP3_TONE[..MP3_FRAME_BYTES * 20]);
    let err = AudioDecoder::default().decode_base64(&encoded).unwrap_err();
    assert!(
        matches!(err, DetectionError::AudioTooShort(d) if (d - 0.72).abs() < 0.05),
        "{:?}",
        err
    );
}

#[test]
fn test_data_url_prefix_is_accepted() {
    let encoded = format!(
        "data:audio/wav;base64,{}",
        wav_base64(&tone(300.0, 1.5, 16000), 16000)
    );
    let audio = AudioDecoder::default().decode_base64(&encoded).unwrap();
    assert_eq!(audio.samples.len(), 24000);
}

#[test]
fn test_short_clip_is_rejected() {
    let encoded = wav_base64(&tone(300.0, 0.5, 16000), 16000);
    let err = AudioDecoder::default().decode_base64(&encoded).unwrap_err();
    assert!(matches!(err, DetectionError::AudioTooShort(d) if (d - 0.5).abs() < 1e-6));
    assert_eq!(err.code(), ErrorCode::AudioTooShort);
}

#[test]
fn test_long_clip_is_rejected_before_resampling() {
    let encoded = wav_base64(&vec![0.0; 4000 * 301], 4000);
    let err = AudioDecoder::default().decode_base64(&encoded).unwrap_err();
    assert_eq!(err.code(), ErrorCode::AudioTooLong);
}

#[test]
fn test_random_bytes_are_invalid_format() {
    let encoded = STANDARD.encode((0..4096u32).map(|i| (i * 31 % 251) as u8).collect::<Vec<_>>());
    let err = AudioDecoder::default().decode_base64(&encoded).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidFormat);
}

#[test]
fn test_not_base64_is_invalid_format() {
    let err = AudioDecoder::default()
        .decode_base64("this is not base64!!")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidFormat);
    assert!(err.details().unwrap().contains("Base64"));
}
