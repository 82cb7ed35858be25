use anyhow::{Context, Result};
use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::snippet::SnippetGenerator;
use tantivy::{doc, Index, IndexReader, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, info};

use askdb_core::types::{DocumentChunk, Meta, SearchFilters, SearchHit, SourceKind, META_TEXT, META_TITLE, META_URL};

use crate::tantivy_utils::{build_schema, register_tokenizer, Fields};

const WRITER_HEAP_BYTES: usize = 50_000_000;
const SNIPPET_CHARS: usize = 200;

pub struct TextIndex {
	index: Index,
	reader: IndexReader,
	fields: Fields,
}

impl TextIndex {
	/// Create a fresh index in `index_dir`, replacing whatever was there.
	pub fn create(index_dir: &Path) -> Result<Self> {
		if index_dir.exists() { std::fs::remove_dir_all(index_dir)?; }
		std::fs::create_dir_all(index_dir)?;
		let index = Index::create_in_dir(index_dir, build_schema())
			.with_context(|| format!("creating index in {}", index_dir.display()))?;
		Self::from_index(index)
	}

	pub fn open(index_dir: &Path) -> Result<Self> {
		let index = Index::open_in_dir(index_dir).with_context(|| format!("opening index in {}", index_dir.display()))?;
		Self::from_index(index)
	}

	pub fn in_memory() -> Result<Self> { Self::from_index(Index::create_in_ram(build_schema())) }

	fn from_index(index: Index) -> Result<Self> {
		register_tokenizer(&index);
		let fields = Fields::resolve(&index.schema())?;
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
		Ok(Self { index, reader, fields })
	}

	pub fn num_docs(&self) -> u64 { self.reader.searcher().num_docs() }

	/// Add chunks and commit. Returns the number of chunks written.
	pub fn index(&self, chunks: &[DocumentChunk]) -> Result<usize> {
		let mut index_writer = self.index.writer(WRITER_HEAP_BYTES)?;
		let f = self.fields;
		for c in chunks {
			let mut document = doc!(
				f.id => c.id.clone(),
				f.doc_id => c.doc_id.clone(),
				f.title => c.title.clone(),
				f.url => c.url.clone(),
				f.text => c.content.clone(),
			);
			for category in &c.categories {
				document.add_text(f.category, category);
			}
			index_writer.add_document(document)?;
		}
		index_writer.commit()?;
		self.reader.reload()?;
		info!(chunks = chunks.len(), total = self.num_docs(), "text index committed");
		Ok(chunks.len())
	}

	/// BM25 search. Query syntax errors are tolerated: whatever parses is used.
	pub fn search(&self, query_text: &str, k: usize, filters: &SearchFilters) -> Result<Vec<SearchHit>> {
		if k == 0 {
			return Ok(Vec::new());
		}
		let searcher = self.reader.searcher();
		let qp = QueryParser::for_index(&self.index, vec![self.fields.text]);
		let (text_query, errors) = qp.parse_query_lenient(query_text);
		if !errors.is_empty() {
			debug!(query = query_text, errors = errors.len(), "lenient query parse");
		}
		let query = self.with_filters(text_query, filters);
		let top_docs = searcher.search(&query, &TopDocs::with_limit(k))?;

		let mut snippet_generator = SnippetGenerator::create(&searcher, &*query, self.fields.text)?;
		snippet_generator.set_max_num_chars(SNIPPET_CHARS);

		let mut hits = Vec::with_capacity(top_docs.len());
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr)?;
			let get = |field| doc.get_first(field).and_then(|v| v.as_str()).unwrap_or("").to_string();
			let text = get(self.fields.text);
			let fragment = snippet_generator.snippet_from_doc(&doc).fragment().trim().to_string();
			let snippet = if fragment.is_empty() { text.chars().take(SNIPPET_CHARS).collect() } else { fragment };
			let mut metadata = Meta::new();
			metadata.insert(META_TEXT.to_string(), text);
			metadata.insert(META_TITLE.to_string(), get(self.fields.title));
			metadata.insert(META_URL.to_string(), get(self.fields.url));
			metadata.insert("parent_id".to_string(), get(self.fields.doc_id));
			hits.push(SearchHit { doc_id: get(self.fields.id), score, source: SourceKind::Lexical, snippet, metadata });
		}
		Ok(hits)
	}

	fn with_filters(&self, text_query: Box<dyn Query>, filters: &SearchFilters) -> Box<dyn Query> {
		if filters.is_empty() {
			return text_query;
		}
		let any_category: Vec<(Occur, Box<dyn Query>)> = filters
			.categories
			.iter()
			.map(|c| {
				let term = Term::from_field_text(self.fields.category, c);
				(Occur::Should, Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>)
			})
			.collect();
		Box::new(BooleanQuery::new(vec![(Occur::Must, text_query), (Occur::Must, Box::new(BooleanQuery::new(any_category)))]))
	}
}
