//! Test data generation for benchmarks.
//!
//! Generators are seeded so every run packs the same tables.

use packq_core::catalog::{
    Catalog, CollectionShape, EntityDef, FieldSchema, MemberType, NavigationDef, SchemaBundle,
    TableSchema,
};
use packq_core::storage::MemoryTable;
use packq_core::Error;
use packq_proto::{ScalarKind, Value};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Scale factor for benchmark data generation.
#[derive(Clone, Copy, Debug, Default)]
pub enum Scale {
    /// Tiny scale: 10 authors, 20 books.
    /// Use for quick tests and development iteration.
    Tiny,
    /// Small scale: ~100 authors
    Small,
    /// Medium scale: ~2,000 authors
    #[default]
    Medium,
    /// Large scale: ~100,000 authors
    Large,
}

impl Scale {
    /// Get the author count for this scale.
    pub fn count(&self) -> usize {
        match self {
            Scale::Tiny => 10,
            Scale::Small => 100,
            Scale::Medium => 2_000,
            Scale::Large => 100_000,
        }
    }

    /// Get the books per author ratio.
    pub fn books_per_author(&self) -> usize {
        match self {
            Scale::Tiny => 2,
            Scale::Small => 5,
            Scale::Medium => 5,
            Scale::Large => 10,
        }
    }
}

/// Author row data.
pub struct AuthorData {
    pub id: i32,
    pub name: String,
    pub country: i32,
    pub rating: i32,
}

/// Book row data.
pub struct BookData {
    pub id: i32,
    pub title: String,
    pub pages: i32,
    /// Zero for orphaned books.
    pub author_id: i32,
}

/// Countries are small integer codes.
pub const COUNTRIES: i32 = 20;

fn random_string(rng: &mut StdRng, len: usize) -> String {
    (0..len).map(|_| rng.sample(Alphanumeric) as char).collect()
}

/// Generate authors with a spread of ratings.
pub fn generate_authors(count: usize) -> Vec<AuthorData> {
    const SEED: u64 = 12345;
    let mut rng = StdRng::seed_from_u64(SEED);

    let name_prefixes = [
        "Alice", "Bob", "Charlie", "David", "Eve", "Frank", "Grace", "Henry", "Ivy", "Jack",
    ];

    (0..count)
        .map(|i| AuthorData {
            id: i as i32 + 1,
            name: format!("{}_{}", name_prefixes[i % name_prefixes.len()], i),
            country: (i as i32) % COUNTRIES,
            rating: rng.gen_range(0..100),
        })
        .collect()
}

/// Generate books pointing at authors. About one book in twenty has no author.
pub fn generate_books(count: usize, authors: usize) -> Vec<BookData> {
    const SEED: u64 = 54321;
    let mut rng = StdRng::seed_from_u64(SEED);

    (0..count)
        .map(|i| {
            let author_id = if rng.gen_bool(0.05) || authors == 0 {
                0
            } else {
                (i % authors) as i32 + 1
            };
            BookData {
                id: i as i32 + 1,
                title: format!("Book {}: {}", i, random_string(&mut rng, 16)),
                pages: rng.gen_range(40..1200),
                author_id,
            }
        })
        .collect()
}

pub fn author_schema() -> TableSchema {
    TableSchema::new("Author")
        .with_field(FieldSchema::id("Id", 0))
        .with_field(FieldSchema::string("Name", 1))
        .with_field(FieldSchema::scalar("Country", ScalarKind::I32, 2))
        .with_field(FieldSchema::scalar("Rating", ScalarKind::I32, 3))
}

pub fn book_schema() -> TableSchema {
    TableSchema::new("Book")
        .with_field(FieldSchema::id("Id", 0))
        .with_field(FieldSchema::string("Title", 1))
        .with_field(FieldSchema::scalar("Pages", ScalarKind::I32, 2))
        .with_field(FieldSchema::scalar("AuthorId", ScalarKind::I32, 3).references("Author"))
}

/// Author/Book entity model.
pub fn library_bundle() -> SchemaBundle {
    SchemaBundle::new(1)
        .with_entity(
            EntityDef::new("Author", "Author", "Id")
                .with_member("Id", MemberType::Scalar(ScalarKind::I32))
                .with_member("Name", MemberType::String)
                .with_member("Country", MemberType::Scalar(ScalarKind::I32))
                .with_member("Rating", MemberType::Scalar(ScalarKind::I32))
                .with_navigation(NavigationDef::dependents(
                    "Books",
                    "Book",
                    "AuthorId",
                    CollectionShape::List,
                )),
        )
        .with_entity(
            EntityDef::new("Book", "Book", "Id")
                .with_member("Id", MemberType::Scalar(ScalarKind::I32))
                .with_member("Title", MemberType::String)
                .with_member("Pages", MemberType::Scalar(ScalarKind::I32))
                .with_member("AuthorId", MemberType::Scalar(ScalarKind::I32))
                .with_navigation(NavigationDef::reference("Author", "Author", "AuthorId")),
        )
}

pub fn library_catalog() -> Result<Catalog, Error> {
    Catalog::build(&library_bundle(), &[author_schema(), book_schema()][..])
}

pub fn author_table(authors: &[AuthorData]) -> Result<MemoryTable, Error> {
    authors
        .iter()
        .fold(MemoryTable::builder(author_schema()), |builder, a| {
            builder.row(
                a.id,
                [
                    ("Name", Value::from(a.name.as_str())),
                    ("Country", Value::from(a.country)),
                    ("Rating", Value::from(a.rating)),
                ],
            )
        })
        .build()
}

pub fn book_table(books: &[BookData]) -> Result<MemoryTable, Error> {
    books
        .iter()
        .fold(MemoryTable::builder(book_schema()), |builder, b| {
            builder.row(
                b.id,
                [
                    ("Title", Value::from(b.title.as_str())),
                    ("Pages", Value::from(b.pages)),
                    ("AuthorId", Value::from(b.author_id)),
                ],
            )
        })
        .build()
}
