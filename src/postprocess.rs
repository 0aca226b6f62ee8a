//! PDF post-processing: document metadata, outline, page boxes and preflight

use crate::{
    to_container_path, BuildError, ExtractedDocumentData, PageProgression, PageSizeData,
    PdfTarget, PreflightMode, TocItem,
};
use async_trait::async_trait;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, StringFormat};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Dublin Core terms namespace used for metadata keys reported by the viewer.
pub const DC_TERMS: &str = "http://purl.org/dc/terms/";

/// Everything the post-processor needs to finish a captured PDF
#[derive(Debug, Clone)]
pub struct PostProcessRequest {
    pub pdf: Vec<u8>,
    pub data: ExtractedDocumentData,
    pub browser_version: String,
    /// Leave `/Creator` unset (custom viewer without a detectable core version)
    pub disable_creator_option: bool,
    pub target: PdfTarget,
    /// Image used for containerized preflight
    pub image: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Write the finished document and return its path.
    async fn process(&self, request: PostProcessRequest) -> Result<PathBuf, BuildError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfPostProcessor;

#[async_trait]
impl PostProcessor for PdfPostProcessor {
    async fn process(&self, request: PostProcessRequest) -> Result<PathBuf, BuildError> {
        debug!("Post-processing {} bytes", request.pdf.len());
        let mut doc = Document::load_mem(&request.pdf)?;

        apply_metadata(
            &mut doc,
            &request.data,
            &request.browser_version,
            request.disable_creator_option,
        )?;
        apply_outline(&mut doc, &request.data.table_of_contents)?;
        apply_page_boxes(&mut doc, &request.data.page_size_data)?;

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes)?;
        save_with_preflight(&bytes, &request.target, &request.image).await?;

        Ok(request.target.path)
    }
}

fn first_value<'a>(data: &'a ExtractedDocumentData, term: &str) -> Option<&'a str> {
    data.metadata
        .get(&format!("{DC_TERMS}{term}"))
        .and_then(|values| values.first())
        .map(|value| value.value.as_str())
}

fn joined_values(data: &ExtractedDocumentData, term: &str, separator: &str) -> Option<String> {
    let values = data.metadata.get(&format!("{DC_TERMS}{term}"))?;
    if values.is_empty() {
        return None;
    }
    Some(
        values
            .iter()
            .map(|value| value.value.as_str())
            .collect::<Vec<_>>()
            .join(separator),
    )
}

/// PDF text string: literal for ASCII, UTF-16BE with byte order mark otherwise.
pub fn pdf_text(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

fn catalog_id(doc: &Document) -> Result<ObjectId, BuildError> {
    Ok(doc.trailer.get(b"Root")?.as_reference()?)
}

fn catalog_mut(doc: &mut Document) -> Result<&mut Dictionary, BuildError> {
    let id = catalog_id(doc)?;
    Ok(doc.get_object_mut(id)?.as_dict_mut()?)
}

pub fn apply_metadata(
    doc: &mut Document,
    data: &ExtractedDocumentData,
    browser_version: &str,
    disable_creator_option: bool,
) -> Result<(), BuildError> {
    let mut info = Dictionary::new();

    if let Some(title) = first_value(data, "title") {
        info.set("Title", pdf_text(title));
    }
    if let Some(author) = joined_values(data, "creator", "; ") {
        info.set("Author", pdf_text(&author));
    }
    if let Some(subject) = first_value(data, "description") {
        info.set("Subject", pdf_text(subject));
    }
    if let Some(keywords) = joined_values(data, "subject", ", ") {
        info.set("Keywords", pdf_text(&keywords));
    }

    if !disable_creator_option {
        let version = data.core_version.as_deref().unwrap_or("unknown");
        info.set("Creator", pdf_text(&format!("Vivliostyle.js {version}")));
    }
    info.set(
        "Producer",
        pdf_text(&format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            browser_version
        )),
    );

    let now = chrono::Utc::now().format("D:%Y%m%d%H%M%SZ").to_string();
    info.set("CreationDate", Object::string_literal(now.clone()));
    info.set("ModDate", Object::string_literal(now));

    let info_id = doc.add_object(info);
    doc.trailer.set("Info", info_id);

    let language = first_value(data, "language").map(str::to_string);
    let catalog = catalog_mut(doc)?;
    if let Some(language) = language {
        catalog.set("Lang", pdf_text(&language));
    }
    if data.page_progression == PageProgression::Rtl {
        catalog.set("ViewerPreferences", dictionary! { "Direction" => "R2L" });
    }

    debug!("Metadata applied");
    Ok(())
}

/// Names in the catalog's `/Dests` dictionary.
fn named_destinations(doc: &Document) -> Result<BTreeSet<Vec<u8>>, BuildError> {
    let catalog = doc.get_dictionary(catalog_id(doc)?)?;
    let dests = match catalog.get(b"Dests") {
        Ok(Object::Reference(id)) => doc.get_dictionary(*id)?,
        Ok(Object::Dictionary(dests)) => dests,
        _ => return Ok(BTreeSet::new()),
    };
    Ok(dests.iter().map(|(name, _)| name.clone()).collect())
}

/// Adds `items` as siblings under `parent`; returns first, last and visible descendant count.
///
/// An item only links to its destination when the PDF defines that name.
fn add_outline_items(
    doc: &mut Document,
    parent: ObjectId,
    items: &[TocItem],
    destinations: &BTreeSet<Vec<u8>>,
) -> Option<(ObjectId, ObjectId, i64)> {
    if items.is_empty() {
        return None;
    }

    let ids: Vec<ObjectId> = items.iter().map(|_| doc.new_object_id()).collect();
    let mut count = 0;

    for (i, item) in items.iter().enumerate() {
        let mut entry = dictionary! {
            "Title" => pdf_text(&item.title),
            "Parent" => parent,
        };
        if destinations.contains(item.destination.as_bytes()) {
            entry.set("Dest", Object::Name(item.destination.as_bytes().to_vec()));
        } else {
            warn!("No destination named {:?} for outline item {:?}", item.destination, item.title);
        }
        if i > 0 {
            entry.set("Prev", ids[i - 1]);
        }
        if let Some(next) = ids.get(i + 1) {
            entry.set("Next", *next);
        }
        if let Some((first, last, descendants)) = add_outline_items(doc, ids[i], &item.children, destinations) {
            entry.set("First", first);
            entry.set("Last", last);
            entry.set("Count", descendants);
            count += descendants;
        }
        count += 1;
        doc.objects.insert(ids[i], Object::Dictionary(entry));
    }

    Some((ids[0], ids[ids.len() - 1], count))
}

pub fn apply_outline(doc: &mut Document, toc: &[TocItem]) -> Result<(), BuildError> {
    if toc.is_empty() {
        return Ok(());
    }

    let destinations = named_destinations(doc)?;
    let outlines_id = doc.new_object_id();
    let mut outlines = dictionary! { "Type" => "Outlines" };
    if let Some((first, last, count)) = add_outline_items(doc, outlines_id, toc, &destinations) {
        outlines.set("First", first);
        outlines.set("Last", last);
        outlines.set("Count", count);
    }
    doc.objects.insert(outlines_id, Object::Dictionary(outlines));

    let catalog = catalog_mut(doc)?;
    catalog.set("Outlines", outlines_id);
    catalog.set("PageMode", "UseOutlines");
    debug!("Outline written with {} top-level items", toc.len());
    Ok(())
}

fn media_box(doc: &Document, page_id: ObjectId) -> Result<[f32; 4], BuildError> {
    let page = doc.get_dictionary(page_id)?;
    let media = match page.get(b"MediaBox") {
        Ok(Object::Reference(id)) => doc.get_object(*id)?.as_array()?.clone(),
        Ok(object) => object.as_array()?.clone(),
        Err(_) => return Ok([0.0, 0.0, 612.0, 792.0]),
    };

    let mut rect = [0.0; 4];
    for (slot, value) in rect.iter_mut().zip(media.iter()) {
        *slot = value.as_float()?;
    }
    Ok(rect)
}

fn rect(llx: f64, lly: f64, urx: f64, ury: f64) -> Object {
    Object::Array(vec![
        Object::Real(llx as f32),
        Object::Real(lly as f32),
        Object::Real(urx as f32),
        Object::Real(ury as f32),
    ])
}

pub fn apply_page_boxes(doc: &mut Document, sizes: &[PageSizeData]) -> Result<(), BuildError> {
    let mut pages = doc.get_pages();

    // Chrome may append a blank page after the last sheet
    if sizes.len() + 1 == pages.len() {
        if let Some(&last) = pages.keys().next_back() {
            debug!("Dropping trailing page {}", last);
            doc.delete_pages(&[last]);
            pages = doc.get_pages();
        }
    }

    if sizes.len() != pages.len() {
        warn!(
            "Page count mismatch ({} pages, {} page boxes); leaving page boxes untouched",
            pages.len(),
            sizes.len()
        );
        return Ok(());
    }

    for (page_id, size) in pages.values().copied().zip(sizes) {
        if size.media_width <= 0.0 || size.media_height <= 0.0 {
            continue;
        }
        let original = media_box(doc, page_id)?;
        let top = f64::from(original[3]);
        let bottom = top - size.media_height;

        let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
        page.set("MediaBox", rect(0.0, bottom, size.media_width, top));

        let (Some(offset), Some(bleed)) = (size.bleed_offset, size.bleed_size) else {
            continue;
        };
        if offset == 0.0 && bleed == 0.0 {
            continue;
        }
        page.set(
            "BleedBox",
            rect(offset, bottom + offset, size.media_width - offset, top - offset),
        );
        let trim = offset + bleed;
        page.set(
            "TrimBox",
            rect(trim, bottom + trim, size.media_width - trim, top - trim),
        );
    }

    Ok(())
}

/// Write `pdf` to the target, through press-ready when preflight is requested.
pub async fn save_with_preflight(pdf: &[u8], target: &PdfTarget, image: &str) -> Result<(), BuildError> {
    let Some(mode) = target.preflight else {
        tokio::fs::write(&target.path, pdf).await?;
        return Ok(());
    };

    let input = std::env::temp_dir().join(format!("pagepress-{}.pdf", uuid::Uuid::new_v4()));
    tokio::fs::write(&input, pdf).await?;
    info!("Running preflight ({:?})", mode);

    let result = run_press_ready(mode, &input, target, image).await;
    if let Err(e) = tokio::fs::remove_file(&input).await {
        debug!("Failed to remove {}: {}", input.display(), e);
    }
    result
}

pub fn press_ready_args(input: &Path, output: &Path, options: &[String]) -> Vec<String> {
    let mut args = vec![
        "build".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-o".to_string(),
        output.to_string_lossy().into_owned(),
    ];
    args.extend(options.iter().map(|opt| format!("--{opt}")));
    args
}

async fn run_press_ready(
    mode: PreflightMode,
    input: &Path,
    target: &PdfTarget,
    image: &str,
) -> Result<(), BuildError> {
    let mut command = match mode {
        PreflightMode::PressReadyLocal => {
            let mut command = Command::new("press-ready");
            command.args(press_ready_args(input, &target.path, &target.preflight_options));
            command
        }
        PreflightMode::PressReady => {
            let input_dir = input.parent().unwrap_or_else(|| Path::new("/"));
            let output_dir = target.path.parent().unwrap_or_else(|| Path::new("/"));
            let container_input = to_container_path(input);
            let container_output = to_container_path(&target.path);

            let mut command = Command::new("docker");
            command.args(["run", "--rm"]);
            for dir in [input_dir, output_dir] {
                command.arg("-v").arg(format!(
                    "{}:{}",
                    dir.display(),
                    to_container_path(dir).display()
                ));
            }
            command.arg(image).arg("press-ready").args(press_ready_args(
                &container_input,
                &container_output,
                &target.preflight_options,
            ));
            command
        }
    };

    let output = command
        .output()
        .await
        .map_err(|e| BuildError::PostProcessFailed(format!("Failed to start press-ready: {e}")))?;
    if !output.status.success() {
        return Err(BuildError::PostProcessFailed(format!(
            "press-ready exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
