//! Windows OCR API backend
//!
//! Uses the built-in Windows.Media.Ocr engine. It reports no per-word
//! confidence, so every token carries 100 on the percentage scale.

use anyhow::{Context, Result};
use image::{imageops, RgbaImage};
use tracing::{debug, info, warn};
use windows::{
    core::HSTRING,
    Foundation::IAsyncOperation,
    Globalization::Language,
    Graphics::Imaging::{BitmapPixelFormat, SoftwareBitmap},
    Media::Ocr::{OcrEngine as WinOcrEngine, OcrResult as WinOcrResult},
    Storage::Streams::{DataReader, DataWriter, InMemoryRandomAccessStream},
};

use crate::recognition::engine::{
    EngineError, PixelBox, RawToken, RecognizerFactory, TextRecognizer, TileRecognition,
};
use crate::recognition::tiling::Tile;

/// Confidence reported for every word
const WINDOWS_OCR_CONFIDENCE: f32 = 100.0;

/// Windows OCR engine wrapper
pub struct WindowsOcr {
    engine: WinOcrEngine,
    language: String,
}

impl WindowsOcr {
    /// Create an engine for `language`. Three-letter codes such as `eng` are
    /// mapped to BCP-47 tags. Unsupported languages fall back to the user
    /// profile languages.
    pub fn new(language: &str) -> Result<Self, EngineError> {
        Self::create(language).map_err(|e| EngineError::backend(format!("{:#}", e)))
    }

    fn create(language: &str) -> Result<Self> {
        let tag = language_tag(language);
        info!("Initializing Windows OCR engine with language: {} ({})", language, tag);

        let win_language =
            Language::CreateLanguage(&HSTRING::from(tag)).context("Failed to create language")?;

        if !WinOcrEngine::IsLanguageSupported(&win_language)
            .context("Failed to check language support")?
        {
            warn!("Language '{}' not supported, falling back to user profile languages", tag);
            let engine = WinOcrEngine::TryCreateFromUserProfileLanguages()
                .context("Failed to create OCR engine from user profile")?;
            let fallback = engine
                .RecognizerLanguage()
                .context("Failed to get recognizer language")?
                .LanguageTag()
                .context("Failed to get language tag")?
                .to_string();
            info!("Windows OCR initialized with language: {}", fallback);
            return Ok(Self {
                engine,
                language: language.to_string(),
            });
        }

        let engine = WinOcrEngine::TryCreateFromLanguage(&win_language)
            .context("Failed to create OCR engine for language")?;
        info!("Windows OCR initialized");

        Ok(Self {
            engine,
            language: language.to_string(),
        })
    }

    /// Factory creating Windows OCR engines
    pub fn factory() -> WindowsOcrFactory {
        WindowsOcrFactory
    }

    /// OCR languages installed on this system
    pub fn available_languages() -> Result<Vec<String>> {
        let languages = WinOcrEngine::AvailableRecognizerLanguages()
            .context("Failed to get available languages")?;

        let mut result = Vec::new();
        for i in 0..languages.Size().context("Failed to get languages size")? {
            if let Ok(lang) = languages.GetAt(i) {
                if let Ok(tag) = lang.LanguageTag() {
                    result.push(tag.to_string());
                }
            }
        }
        Ok(result)
    }

    fn recognize_region(&self, frame: &RgbaImage, region: &Tile) -> Result<TileRecognition> {
        if region.width == 0 || region.height == 0 {
            return Ok(TileRecognition::empty());
        }

        let tile = imageops::crop_imm(frame, region.x, region.y, region.width, region.height).to_image();
        debug!("Windows OCR: processing {}x{} tile at ({}, {})", region.width, region.height, region.x, region.y);

        let bitmap = create_software_bitmap(&rgba_to_bgra(tile.as_raw()), region.width, region.height)?;
        let ocr_result = run_ocr_sync(&self.engine, &bitmap)?;

        let text = ocr_result.Text().context("Failed to get OCR text")?.to_string();
        let tokens = extract_tokens(&ocr_result)?;
        debug!("Windows OCR: found {} words", tokens.len());

        Ok(TileRecognition { text, tokens })
    }
}

impl TextRecognizer for WindowsOcr {
    fn name(&self) -> &'static str {
        "windows-ocr"
    }

    fn language(&self) -> &str {
        &self.language
    }

    fn recognize(&mut self, frame: &RgbaImage, region: &Tile) -> Result<TileRecognition, EngineError> {
        self.recognize_region(frame, region)
            .map_err(|e| EngineError::Recognition(format!("{:#}", e)))
    }
}

/// Builds [`WindowsOcr`] engines
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsOcrFactory;

impl RecognizerFactory for WindowsOcrFactory {
    fn create(&self, language: &str) -> Result<Box<dyn TextRecognizer>, EngineError> {
        Ok(Box::new(WindowsOcr::new(language)?))
    }
}

/// Map common three-letter language codes to BCP-47 tags
fn language_tag(language: &str) -> &str {
    match language {
        "eng" => "en-US",
        "deu" => "de-DE",
        "fra" => "fr-FR",
        "spa" => "es-ES",
        "ita" => "it-IT",
        "por" => "pt-PT",
        "nld" => "nl-NL",
        "jpn" => "ja-JP",
        "kor" => "ko-KR",
        "rus" => "ru-RU",
        "chi_sim" => "zh-Hans",
        "chi_tra" => "zh-Hant",
        other => other,
    }
}

/// Convert RGBA to BGRA (Windows expects BGRA)
fn rgba_to_bgra(rgba: &[u8]) -> Vec<u8> {
    let mut bgra = rgba.to_vec();
    for chunk in bgra.chunks_exact_mut(4) {
        chunk.swap(0, 2);
    }
    bgra
}

/// Create a SoftwareBitmap from BGRA data through an in-memory stream
fn create_software_bitmap(bgra_data: &[u8], width: u32, height: u32) -> Result<SoftwareBitmap> {
    let stream = InMemoryRandomAccessStream::new().context("Failed to create in-memory stream")?;
    let writer = DataWriter::CreateDataWriter(&stream).context("Failed to create data writer")?;
    writer.WriteBytes(bgra_data).context("Failed to write pixel data")?;
    writer
        .StoreAsync()
        .context("Failed to start store operation")?
        .get()
        .context("Failed to store data")?;
    writer
        .FlushAsync()
        .context("Failed to start flush operation")?
        .get()
        .context("Failed to flush data")?;

    let bitmap = SoftwareBitmap::Create(BitmapPixelFormat::Bgra8, width as i32, height as i32)
        .context("Failed to create SoftwareBitmap")?;

    let input_stream = stream.GetInputStreamAt(0).context("Failed to get input stream")?;
    let reader = DataReader::CreateDataReader(&input_stream).context("Failed to create data reader")?;
    reader
        .LoadAsync(bgra_data.len() as u32)
        .context("Failed to start load operation")?
        .get()
        .context("Failed to load data")?;
    let buffer = reader
        .ReadBuffer(bgra_data.len() as u32)
        .context("Failed to read buffer")?;

    bitmap.CopyFromBuffer(&buffer).context("Failed to copy buffer to bitmap")?;
    Ok(bitmap)
}

/// Run OCR synchronously (blocks until complete)
fn run_ocr_sync(engine: &WinOcrEngine, bitmap: &SoftwareBitmap) -> Result<WinOcrResult> {
    let async_op: IAsyncOperation<WinOcrResult> = engine
        .RecognizeAsync(bitmap)
        .context("Failed to start OCR recognition")?;
    async_op.get().context("OCR recognition failed")
}

/// Word tokens with tile-local boxes
fn extract_tokens(ocr_result: &WinOcrResult) -> Result<Vec<RawToken>> {
    let mut tokens = Vec::new();
    let lines = ocr_result.Lines().context("Failed to get OCR lines")?;

    for i in 0..lines.Size().context("Failed to get lines size")? {
        let line = lines.GetAt(i).context("Failed to get line")?;
        let words = line.Words().context("Failed to get words")?;

        for j in 0..words.Size().context("Failed to get words size")? {
            let word = words.GetAt(j).context("Failed to get word")?;
            let text = word.Text().context("Failed to get word text")?.to_string();
            let rect = word.BoundingRect().context("Failed to get bounding rect")?;

            tokens.push(RawToken::new(
                text,
                WINDOWS_OCR_CONFIDENCE,
                PixelBox::from_rect(rect.X, rect.Y, rect.Width, rect.Height),
            ));
        }
    }
    Ok(tokens)
}
