//! Incremental merging of per-chunk PDFs into one artifact.
//!
//! The first chunk's document becomes the artifact byte-for-byte. Every
//! later chunk has its pages deep-copied onto the end of the artifact's
//! root page list, so the final page order is chunk order, then page order
//! within each chunk.
//!
//! Copying a page pulls in everything it references (content streams,
//! fonts, images) under fresh object ids. Attributes a page may inherit
//! from its page-tree ancestors (`MediaBox`, `CropBox`, `Resources`,
//! `Rotate`) are resolved onto the page first and its `Parent` link is
//! dropped, so the source page tree is never dragged along.
//!
//! Writes go to `<artifact>.pdf.tmp` and are renamed into place, so the
//! artifact on disk is always a complete PDF.

use crate::config::MergeStrategy;
use crate::error::{CleanupError, Sheet2PdfError};
use crate::pipeline::remove_file;
use crate::pipeline::render::RenderedDocument;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Page attributes that may be inherited from a `Pages` ancestor.
const INHERITABLE_KEYS: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Guard against malformed, cyclic page trees.
const MAX_TREE_DEPTH: usize = 64;

/// The finished, merged PDF on disk.
#[derive(Debug, Clone)]
pub struct MergedArtifact {
    pub path: PathBuf,
    /// File name offered to the client, e.g. `receipts-<uuid>.pdf`.
    pub file_name: String,
    pub page_count: usize,
    /// Chunk documents merged into the artifact.
    pub chunks: usize,
}

/// Deep-copies objects from one document into another, remapping ids.
struct ObjectCopier<'a> {
    source: &'a Document,
    target: &'a mut Document,
    id_map: HashMap<ObjectId, ObjectId>,
}

impl<'a> ObjectCopier<'a> {
    fn new(source: &'a Document, target: &'a mut Document) -> Self {
        Self {
            source,
            target,
            id_map: HashMap::new(),
        }
    }

    /// Reserve target ids for every source page before anything is copied,
    /// so references to a page (link destinations, annotation `/P`) resolve
    /// to the page's single copy instead of pulling in a second one.
    fn reserve_pages(&mut self, page_ids: &[ObjectId]) {
        for &page_id in page_ids {
            let new_id = self.target.add_object(Object::Null);
            self.id_map.insert(page_id, new_id);
        }
    }

    /// Copy a page dictionary, detached from its source page tree.
    fn copy_page(&mut self, page_id: ObjectId) -> Result<ObjectId, lopdf::Error> {
        let mut page = self.source.get_dictionary(page_id)?.clone();
        for key in INHERITABLE_KEYS {
            if !page.has(key) {
                if let Some(value) = inherited_attribute(self.source, &page, key) {
                    page.set(key.to_vec(), value);
                }
            }
        }
        page.remove(b"Parent");

        let new_id = match self.id_map.get(&page_id) {
            Some(id) => *id,
            None => {
                let id = self.target.add_object(Object::Null);
                self.id_map.insert(page_id, id);
                id
            }
        };
        let remapped = self.remap_references(Object::Dictionary(page))?;
        self.target.objects.insert(new_id, remapped);
        Ok(new_id)
    }

    fn copy_object(&mut self, source_id: ObjectId) -> Result<ObjectId, lopdf::Error> {
        if let Some(target_id) = self.id_map.get(&source_id) {
            return Ok(*target_id);
        }

        // Reserve the id before recursing so reference cycles terminate.
        let new_id = self.target.add_object(Object::Null);
        self.id_map.insert(source_id, new_id);

        let mut obj = self.source.get_object(source_id)?.clone();
        // A page reached indirectly must not drag its source page tree along.
        if let Object::Dictionary(ref mut dict) = obj {
            if is_page(dict) {
                dict.remove(b"Parent");
            }
        }
        let remapped = self.remap_references(obj)?;
        self.target.objects.insert(new_id, remapped);
        Ok(new_id)
    }

    fn remap_references(&mut self, obj: Object) -> Result<Object, lopdf::Error> {
        match obj {
            Object::Reference(id) => Ok(Object::Reference(self.copy_object(id)?)),
            Object::Array(items) => Ok(Object::Array(
                items
                    .into_iter()
                    .map(|o| self.remap_references(o))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Object::Dictionary(dict) => Ok(Object::Dictionary(self.remap_dictionary(dict)?)),
            Object::Stream(mut stream) => {
                stream.dict = self.remap_dictionary(stream.dict)?;
                Ok(Object::Stream(stream))
            }
            other => Ok(other),
        }
    }

    fn remap_dictionary(&mut self, mut dict: Dictionary) -> Result<Dictionary, lopdf::Error> {
        for (_, value) in dict.iter_mut() {
            let taken = std::mem::replace(value, Object::Null);
            *value = self.remap_references(taken)?;
        }
        Ok(dict)
    }
}

fn is_page(dict: &Dictionary) -> bool {
    dict.get(b"Type")
        .and_then(Object::as_name)
        .is_ok_and(|name| name == b"Page")
}

/// Walk `Parent` links looking for an inherited attribute.
fn inherited_attribute(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    for _ in 0..MAX_TREE_DEPTH {
        let node = doc.get_dictionary(parent?).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

/// Append every page of `source` to the root page list of `target`.
///
/// Returns the number of pages appended.
pub fn append_pages(target: &mut Document, source: &Document) -> Result<usize, lopdf::Error> {
    // `get_pages` is keyed by page number, so values come out in page order.
    let source_pages: Vec<ObjectId> = source.get_pages().into_values().collect();
    if source_pages.is_empty() {
        return Ok(0);
    }

    let mut copier = ObjectCopier::new(source, target);
    copier.reserve_pages(&source_pages);
    let new_ids = source_pages
        .into_iter()
        .map(|id| copier.copy_page(id))
        .collect::<Result<Vec<_>, _>>()?;

    let root_id = target.trailer.get(b"Root")?.as_reference()?;
    let pages_id = target.get_dictionary(root_id)?.get(b"Pages")?.as_reference()?;
    let pages = target.get_object_mut(pages_id)?.as_dict_mut()?;

    let mut kids = pages.get(b"Kids")?.as_array()?.clone();
    let count = pages.get(b"Count")?.as_i64()?;
    kids.extend(new_ids.iter().map(|id| Object::Reference(*id)));
    pages.set("Kids", kids);
    pages.set("Count", count + new_ids.len() as i64);

    for id in &new_ids {
        if let Ok(page) = target.get_object_mut(*id).and_then(Object::as_dict_mut) {
            page.set("Parent", pages_id);
        }
    }

    Ok(new_ids.len())
}

/// Count the pages of a PDF held in memory.
pub fn count_pages(bytes: &[u8]) -> Result<usize, lopdf::Error> {
    Ok(Document::load_mem(bytes)?.get_pages().len())
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("pdf.tmp")
}

fn save_atomic(doc: &mut Document, path: &Path) -> Result<(), std::io::Error> {
    let tmp = tmp_path(path);
    let mut writer = BufWriter::new(File::create(&tmp)?);
    doc.save_to(&mut writer)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    writer.flush()?;
    drop(writer);
    std::fs::rename(&tmp, path)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Sheet2PdfError> {
    let tmp = tmp_path(path);
    let io_err = |source: std::io::Error| Sheet2PdfError::ArtifactIo {
        path: path.to_path_buf(),
        source,
    };
    tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)
}

enum Accumulator {
    Empty,
    /// First document, kept verbatim until a second one arrives.
    Raw(Vec<u8>),
    Parsed(Box<Document>),
    OnDisk,
}

/// Accumulates rendered chunk documents into one artifact.
///
/// Documents must be appended in chunk order. After an error the merger
/// should be [`discard`](Self::discard)ed.
pub struct IncrementalMerger {
    path: PathBuf,
    strategy: MergeStrategy,
    state: Accumulator,
    page_count: usize,
    chunks: usize,
}

impl IncrementalMerger {
    pub fn new(path: impl Into<PathBuf>, strategy: MergeStrategy) -> Self {
        Self {
            path: path.into(),
            strategy,
            state: Accumulator::Empty,
            page_count: 0,
            chunks: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    fn merge_error(&self, chunk: usize, detail: impl ToString) -> Sheet2PdfError {
        Sheet2PdfError::MergeFailed {
            chunk,
            path: self.path.clone(),
            detail: detail.to_string(),
        }
    }

    /// Add the next chunk's document. Returns the pages it contributed.
    pub async fn append(&mut self, doc: RenderedDocument) -> Result<usize, Sheet2PdfError> {
        let chunk = doc.chunk_index;
        let state = std::mem::replace(&mut self.state, Accumulator::Empty);

        let (next, added) = match (state, self.strategy) {
            (Accumulator::Empty, strategy) => {
                let bytes = doc.bytes;
                let (bytes, pages) = tokio::task::spawn_blocking(move || {
                    let pages = count_pages(&bytes);
                    (bytes, pages)
                })
                .await
                .map_err(|e| Sheet2PdfError::Internal(format!("merge task: {e}")))?;
                let pages = pages.map_err(|e| self.merge_error(chunk, e))?;

                match strategy {
                    MergeStrategy::Disk => {
                        write_atomic(&self.path, &bytes).await?;
                        (Accumulator::OnDisk, pages)
                    }
                    MergeStrategy::InMemory => (Accumulator::Raw(bytes), pages),
                }
            }

            (Accumulator::OnDisk, _) => {
                let path = self.path.clone();
                let bytes = doc.bytes;
                let added = tokio::task::spawn_blocking(move || {
                    let mut target = Document::load(&path).map_err(|e| e.to_string())?;
                    let source = Document::load_mem(&bytes).map_err(|e| e.to_string())?;
                    let added = append_pages(&mut target, &source).map_err(|e| e.to_string())?;
                    save_atomic(&mut target, &path).map_err(|e| e.to_string())?;
                    Ok::<_, String>(added)
                })
                .await
                .map_err(|e| Sheet2PdfError::Internal(format!("merge task: {e}")))?
                .map_err(|e| self.merge_error(chunk, e))?;
                (Accumulator::OnDisk, added)
            }

            (Accumulator::Raw(first), _) => {
                let bytes = doc.bytes;
                let (target, added) = tokio::task::spawn_blocking(move || {
                    let mut target = Document::load_mem(&first).map_err(|e| e.to_string())?;
                    let source = Document::load_mem(&bytes).map_err(|e| e.to_string())?;
                    let added = append_pages(&mut target, &source).map_err(|e| e.to_string())?;
                    Ok::<_, String>((target, added))
                })
                .await
                .map_err(|e| Sheet2PdfError::Internal(format!("merge task: {e}")))?
                .map_err(|e| self.merge_error(chunk, e))?;
                (Accumulator::Parsed(Box::new(target)), added)
            }

            (Accumulator::Parsed(mut target), _) => {
                let bytes = doc.bytes;
                let (target, added) = tokio::task::spawn_blocking(move || {
                    let source = Document::load_mem(&bytes).map_err(|e| e.to_string())?;
                    let added = append_pages(&mut target, &source).map_err(|e| e.to_string())?;
                    Ok::<_, String>((target, added))
                })
                .await
                .map_err(|e| Sheet2PdfError::Internal(format!("merge task: {e}")))?
                .map_err(|e| self.merge_error(chunk, e))?;
                (Accumulator::Parsed(target), added)
            }
        };

        self.state = next;
        self.page_count += added;
        self.chunks += 1;
        debug!(
            "Merged chunk {} (+{} pages, {} total) into {}",
            chunk + 1,
            added,
            self.page_count,
            self.path.display()
        );
        Ok(added)
    }

    /// Flush any in-memory state and hand back the finished artifact.
    ///
    /// The merger keeps ownership of the path, so a failure here can still
    /// be followed by [`discard`](Self::discard).
    pub async fn finalize(&mut self) -> Result<MergedArtifact, Sheet2PdfError> {
        match std::mem::replace(&mut self.state, Accumulator::OnDisk) {
            Accumulator::Empty => {
                self.state = Accumulator::Empty;
                return Err(Sheet2PdfError::Internal(
                    "no chunk documents were merged".into(),
                ));
            }
            Accumulator::OnDisk => {}
            Accumulator::Raw(bytes) => write_atomic(&self.path, &bytes).await?,
            Accumulator::Parsed(mut target) => {
                let path = self.path.clone();
                tokio::task::spawn_blocking(move || save_atomic(&mut target, &path))
                    .await
                    .map_err(|e| Sheet2PdfError::Internal(format!("merge task: {e}")))?
                    .map_err(|source| Sheet2PdfError::ArtifactIo {
                        path: self.path.clone(),
                        source,
                    })?;
            }
        }

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(MergedArtifact {
            path: self.path.clone(),
            file_name,
            page_count: self.page_count,
            chunks: self.chunks,
        })
    }

    /// Delete the partial artifact and any temp file left by an interrupted write.
    pub async fn discard(self) -> Result<(), CleanupError> {
        let tmp = remove_file(&tmp_path(&self.path)).await;
        remove_file(&self.path).await?;
        tmp.map(|_| ())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Stream, StringFormat};
    use tempfile::TempDir;

    /// A PDF with `pages` pages, each drawing `"<label> <n>"`.
    ///
    /// With `inherit` set, `MediaBox` and `Resources` live on the page tree
    /// node instead of the pages.
    pub(crate) fn sample_pdf(pages: u32, label: &str, inherit: bool) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let media_box: Vec<Object> = vec![0.into(), 0.into(), 595.into(), 842.into()];

        let mut kids: Vec<Object> = vec![];
        for i in 1..=pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![72.into(), 720.into()]),
                    Operation::new(
                        "Tj",
                        vec![Object::String(
                            format!("{label} {i}").into_bytes(),
                            StringFormat::Literal,
                        )],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            };
            if !inherit {
                page.set("MediaBox", media_box.clone());
                page.set("Resources", resources_id);
            }
            kids.push(doc.add_object(page).into());
        }

        let mut tree = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        };
        if inherit {
            tree.set("MediaBox", media_box);
            tree.set("Resources", resources_id);
        }
        doc.objects.insert(pages_id, tree.into());
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    /// Text of every page of the PDF at `path`, in page order.
    pub(crate) fn page_texts(path: &Path) -> Vec<String> {
        let doc = Document::load(path).unwrap();
        doc.get_pages()
            .into_values()
            .map(|id| String::from_utf8_lossy(&doc.get_page_content(id).unwrap()).into_owned())
            .collect()
    }

    fn rendered(chunk_index: usize, bytes: Vec<u8>) -> RenderedDocument {
        RenderedDocument { chunk_index, bytes }
    }

    async fn merge_three(strategy: MergeStrategy) -> (TempDir, MergedArtifact) {
        let dir = TempDir::new().unwrap();
        let mut merger = IncrementalMerger::new(dir.path().join("receipts-test.pdf"), strategy);
        merger.append(rendered(0, sample_pdf(2, "A", false))).await.unwrap();
        merger.append(rendered(1, sample_pdf(3, "B", false))).await.unwrap();
        merger.append(rendered(2, sample_pdf(1, "C", true))).await.unwrap();
        let artifact = merger.finalize().await.unwrap();
        (dir, artifact)
    }

    fn assert_page_order(path: &Path) {
        let texts = page_texts(path);
        let expected = ["A 1", "A 2", "B 1", "B 2", "B 3", "C 1"];
        assert_eq!(texts.len(), expected.len());
        for (text, want) in texts.iter().zip(expected) {
            assert!(text.contains(want), "expected {want:?} in {text:?}");
        }
    }

    #[tokio::test]
    async fn disk_merge_preserves_chunk_then_page_order() {
        let (_dir, artifact) = merge_three(MergeStrategy::Disk).await;
        assert_eq!(artifact.page_count, 6);
        assert_eq!(artifact.chunks, 3);
        assert_eq!(artifact.file_name, "receipts-test.pdf");
        assert_page_order(&artifact.path);
        assert!(!tmp_path(&artifact.path).exists());
    }

    #[tokio::test]
    async fn in_memory_merge_matches_disk_order() {
        let (_dir, artifact) = merge_three(MergeStrategy::InMemory).await;
        assert_eq!(artifact.page_count, 6);
        assert_page_order(&artifact.path);
    }

    #[tokio::test]
    async fn single_chunk_is_written_verbatim() {
        for strategy in [MergeStrategy::Disk, MergeStrategy::InMemory] {
            let dir = TempDir::new().unwrap();
            let bytes = sample_pdf(4, "only", false);
            let mut merger = IncrementalMerger::new(dir.path().join("one.pdf"), strategy);
            assert_eq!(merger.append(rendered(0, bytes.clone())).await.unwrap(), 4);
            let artifact = merger.finalize().await.unwrap();
            assert_eq!(std::fs::read(&artifact.path).unwrap(), bytes);
        }
    }

    #[test]
    fn inherited_attributes_are_resolved_on_copy() {
        let mut target = Document::load_mem(&sample_pdf(1, "T", false)).unwrap();
        let source = Document::load_mem(&sample_pdf(2, "S", true)).unwrap();
        assert_eq!(append_pages(&mut target, &source).unwrap(), 2);

        let pages = target.get_pages();
        assert_eq!(pages.len(), 3);
        let copied = target.get_dictionary(pages[&3]).unwrap();
        assert!(copied.has(b"MediaBox"));
        assert!(copied.has(b"Resources"));

        let root_pages = target
            .get_dictionary(target.trailer.get(b"Root").unwrap().as_reference().unwrap())
            .unwrap()
            .get(b"Pages")
            .unwrap()
            .as_reference()
            .unwrap();
        assert_eq!(
            copied.get(b"Parent").unwrap().as_reference().unwrap(),
            root_pages
        );
        assert_eq!(
            target.get_dictionary(root_pages).unwrap().get(b"Count").unwrap().as_i64().unwrap(),
            3
        );
    }

    /// Two pages; page 1 carries a Link annotation whose `/Dest` is page 2.
    fn pdf_with_internal_link() -> Document {
        let mut doc = Document::load_mem(&sample_pdf(2, "L", false)).unwrap();
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let link_id = doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => Object::Array(vec![0.into(), 0.into(), 100.into(), 20.into()]),
            "Dest" => Object::Array(vec![Object::Reference(pages[1]), Object::Name(b"Fit".to_vec())]),
        });
        doc.get_object_mut(pages[0])
            .and_then(Object::as_dict_mut)
            .unwrap()
            .set("Annots", vec![Object::Reference(link_id)]);
        doc
    }

    #[test]
    fn linked_page_is_copied_once() {
        let mut target = Document::load_mem(&sample_pdf(2, "T", false)).unwrap();
        let source = pdf_with_internal_link();
        assert_eq!(append_pages(&mut target, &source).unwrap(), 2);

        let pages = target.get_pages();
        assert_eq!(pages.len(), 4);
        let page_objects = target
            .objects
            .values()
            .filter(|o| o.as_dict().is_ok_and(is_page))
            .count();
        assert_eq!(page_objects, 4);

        let first_copy = target.get_dictionary(pages[&3]).unwrap();
        let link_id = first_copy.get(b"Annots").unwrap().as_array().unwrap()[0]
            .as_reference()
            .unwrap();
        let dest = target
            .get_dictionary(link_id)
            .unwrap()
            .get(b"Dest")
            .unwrap()
            .as_array()
            .unwrap()[0]
            .as_reference()
            .unwrap();
        assert_eq!(dest, pages[&4]);
    }

    #[tokio::test]
    async fn corrupt_chunk_fails_and_discard_cleans_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.pdf");
        let mut merger = IncrementalMerger::new(&path, MergeStrategy::Disk);
        merger.append(rendered(0, sample_pdf(1, "A", false))).await.unwrap();
        assert!(path.exists());

        let err = merger
            .append(rendered(1, b"not a pdf at all".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, Sheet2PdfError::MergeFailed { chunk: 1, .. }));

        merger.discard().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn finalize_without_documents_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut merger = IncrementalMerger::new(dir.path().join("none.pdf"), MergeStrategy::Disk);
        assert!(matches!(
            merger.finalize().await,
            Err(Sheet2PdfError::Internal(_))
        ));
    }
}
