//! Record kinds, canonical column sets, and column-name reconciliation.
//!
//! Spreadsheet exports arrive with human-authored headers (accents,
//! abbreviations, alternate separators, inconsistent casing). Each record kind
//! carries a static table of every historical label variant, lower-cased, and
//! reconciliation is a case-insensitive exact lookup against it: first match
//! wins, unmatched columns pass through for the validator/persistence layer to
//! ignore.

use crate::table::Table;

/// The three spreadsheet export types the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Vendas,
    Cotacoes,
    ProdutosCotados,
}

impl RecordKind {
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Vendas => "vendas",
            Self::Cotacoes => "cotacoes",
            Self::ProdutosCotados => "produtos_cotados",
        }
    }

    /// Column of the `datasets` table holding this kind's content fingerprint.
    pub fn fingerprint_column(&self) -> &'static str {
        match self {
            Self::Vendas => "vendas_fingerprint",
            Self::Cotacoes => "cotacoes_fingerprint",
            Self::ProdutosCotados => "produtos_cotados_fingerprint",
        }
    }

    /// Canonical persisted columns, in schema order (excluding id/dataset_id).
    pub fn canonical_columns(&self) -> &'static [&'static str] {
        match self {
            Self::Vendas => &[
                "cod_cliente",
                "cliente",
                "material",
                "produto",
                "unidade_negocio",
                "canal_distribuicao",
                "hier_produto_1",
                "hier_produto_2",
                "hier_produto_3",
                "data",
                "data_faturamento",
                "qtd_entrada",
                "vlr_entrada",
                "qtd_carteira",
                "vlr_carteira",
                "qtd_rol",
                "vlr_rol",
            ],
            Self::Cotacoes => &[
                "numero_cotacao",
                "numero_revisao",
                "linhas_cotacao",
                "status_cotacao",
                "cod_cliente",
                "cliente",
                "data",
            ],
            Self::ProdutosCotados => &[
                "cotacao",
                "cod_cliente",
                "cliente",
                "centro_fornecedor",
                "material",
                "descricao",
                "quantidade",
                "preco_liquido_unitario",
                "preco_liquido_total",
            ],
        }
    }

    /// Columns a row must have non-null to be attributable; rows failing any
    /// of these (when the column is present) are dropped by the validator.
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            Self::Vendas => &["cod_cliente", "material"],
            Self::Cotacoes => &["numero_cotacao", "cod_cliente"],
            Self::ProdutosCotados => &["cotacao", "cod_cliente", "material"],
        }
    }

    /// Ordered variant table: (canonical name, accepted lower-cased labels).
    ///
    /// Curation note: the historical `doc. vendas`/`documento vendas` labels
    /// were once mapped onto `cod_cliente` by mistake (they identify the sales
    /// document, not the client) and are deliberately not listed here.
    pub fn variants(&self) -> &'static [(&'static str, &'static [&'static str])] {
        match self {
            Self::Vendas => VENDAS_VARIANTS,
            Self::Cotacoes => COTACOES_VARIANTS,
            Self::ProdutosCotados => PRODUTOS_VARIANTS,
        }
    }
}

const CLIENT_CODE_VARIANTS: &[&str] = &[
    "cod_cliente",
    "id_cli",
    "código cliente",
    "codigo cliente",
    "codigo_cliente",
    "cod cliente",
    "cod. cliente",
    "cód. cliente",
    "código do cliente",
    "codigo do cliente",
];

const VENDAS_VARIANTS: &[(&str, &[&str])] = &[
    ("cod_cliente", CLIENT_CODE_VARIANTS),
    ("cliente", &["cliente"]),
    ("material", &["material"]),
    ("produto", &["produto"]),
    (
        "unidade_negocio",
        &["unidade_negocio", "unidade de negócio", "unidade de negocio"],
    ),
    (
        "canal_distribuicao",
        &["canal_distribuicao", "canal distribuição", "canal distribuicao"],
    ),
    (
        "hier_produto_1",
        &["hier_produto_1", "hier. produto 1", "hier produto 1"],
    ),
    (
        "hier_produto_2",
        &["hier_produto_2", "hier. produto 2", "hier produto 2"],
    ),
    (
        "hier_produto_3",
        &["hier_produto_3", "hier. produto 3", "hier produto 3"],
    ),
    ("data", &["data"]),
    (
        "data_faturamento",
        &["data_faturamento", "data faturamento", "data fat."],
    ),
    ("qtd_entrada", &["qtd_entrada", "qtd entrada", "qtd. entrada"]),
    ("vlr_entrada", &["vlr_entrada", "vlr entrada", "vlr. entrada"]),
    ("qtd_carteira", &["qtd_carteira", "qtd carteira", "qtd. carteira"]),
    ("vlr_carteira", &["vlr_carteira", "vlr carteira", "vlr. carteira"]),
    ("qtd_rol", &["qtd_rol", "qtd rol", "qtd. rol"]),
    ("vlr_rol", &["vlr_rol", "vlr rol", "vlr. rol"]),
];

const COTACOES_VARIANTS: &[(&str, &[&str])] = &[
    (
        "numero_cotacao",
        &[
            "numero_cotacao",
            "número da cotação",
            "numero da cotacao",
            "cotação",
            "cotacao",
        ],
    ),
    (
        "numero_revisao",
        &[
            "numero_revisao",
            "número da revisão",
            "numero da revisao",
            "revisão",
            "revisao",
        ],
    ),
    (
        "linhas_cotacao",
        &[
            "linhas_cotacao",
            "linhas de cotação",
            "linhas da cotacao",
            "linhas cotacao",
        ],
    ),
    (
        "status_cotacao",
        &[
            "status_cotacao",
            "status da cotação",
            "status da cotacao",
            "status cotacao",
            "status",
        ],
    ),
    ("cod_cliente", CLIENT_CODE_VARIANTS),
    ("cliente", &["cliente"]),
    ("data", &["data", "data de criação", "data de criacao"]),
];

const PRODUTOS_VARIANTS: &[(&str, &[&str])] = &[
    (
        "cotacao",
        &[
            "cotacao",
            "cotação",
            "número da cotação",
            "numero da cotacao",
            "numero_cotacao",
        ],
    ),
    ("cod_cliente", CLIENT_CODE_VARIANTS),
    ("cliente", &["cliente"]),
    (
        "centro_fornecedor",
        &[
            "centro_fornecedor",
            "centro fornecedor",
            "centro de fornecedor",
        ],
    ),
    (
        "material",
        &[
            "material",
            "código material",
            "codigo material",
            "codigo_material",
            "cod_material",
        ],
    ),
    (
        "descricao",
        &[
            "descricao",
            "descrição",
            "descrição do material",
            "descricao do material",
            "desc_material",
        ],
    ),
    ("quantidade", &["quantidade", "qtd", "qty"]),
    (
        "preco_liquido_unitario",
        &[
            "preco_liquido_unitario",
            "preço líquido unitário",
            "preco liquido unitario",
            "preço_liquido_unitario",
            "preco_unit",
            "valor unitário",
            "valor unitario",
            "valor_unitario",
        ],
    ),
    (
        "preco_liquido_total",
        &[
            "preco_liquido_total",
            "preço líquido total",
            "preco liquido total",
            "preço_liquido_total",
            "valor total",
            "valor_total",
            "total",
        ],
    ),
];

/// Rename a table's columns onto the canonical set for `kind`.
///
/// Each input label is lower-cased and trimmed, then looked up in the kind's
/// variant table. The first canonical entry whose variant list contains the
/// label wins; once a canonical name is taken, later columns that would map to
/// it pass through unchanged (so duplicate headers never collide). Unrecognized
/// columns also pass through unchanged.
pub fn reconcile(kind: RecordKind, table: &Table) -> Table {
    let variants = kind.variants();
    let mut taken: Vec<&str> = Vec::new();

    let columns = table
        .columns
        .iter()
        .map(|label| {
            let needle = label.trim().to_lowercase();
            for (canonical, accepted) in variants {
                if accepted.contains(&needle.as_str()) && !taken.contains(canonical) {
                    taken.push(canonical);
                    return (*canonical).to_string();
                }
            }
            label.clone()
        })
        .collect();

    Table {
        columns,
        rows: table.rows.clone(),
    }
}

// ============================================================================
// File-type detection
// ============================================================================

const VENDAS_HINTS: &[&str] = &["ovs", "vendas", "venda", "faturamento"];
const COTACOES_HINTS: &[&str] = &["cotação", "cotacao", "cotações", "cotacoes", "quote"];
const MATERIAIS_HINTS: &[&str] = &["materiais", "material", "produtos", "produto", "items"];

/// Detect which export a file is, by filename hint first, then by
/// characteristic column signature. Returns None when neither matches.
pub fn detect_kind(filename: &str, table: &Table) -> Option<RecordKind> {
    let name = filename.to_lowercase();

    if VENDAS_HINTS.iter().any(|h| name.contains(h)) {
        return Some(RecordKind::Vendas);
    }
    if COTACOES_HINTS.iter().any(|h| name.contains(h)) {
        return Some(RecordKind::Cotacoes);
    }
    if MATERIAIS_HINTS.iter().any(|h| name.contains(h)) {
        return Some(RecordKind::ProdutosCotados);
    }

    let headers: Vec<String> = table
        .columns
        .iter()
        .map(|c| c.trim().to_lowercase())
        .collect();
    let has = |candidates: &[&str]| headers.iter().any(|h| candidates.contains(&h.as_str()));

    if has(&["vlr_rol", "vlr. rol", "vlr rol", "vlr_entrada", "vlr. entrada", "vlr_carteira"]) {
        return Some(RecordKind::Vendas);
    }
    if has(&["centro_fornecedor", "centro fornecedor", "preco_liquido_total", "preço líquido total", "preço líquido unitário"]) {
        return Some(RecordKind::ProdutosCotados);
    }
    if has(&["numero_cotacao", "número da cotação", "numero da cotacao"]) {
        return Some(RecordKind::Cotacoes);
    }

    None
}
