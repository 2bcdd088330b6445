use crate::common::error::AppError;

// ---
// Helpers de conflito: a coordenação entre workers fica toda nas chaves únicas do banco
// ---

/// `true` quando o erro é uma violação de índice único (SQLSTATE 23505).
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db_err| db_err.is_unique_violation())
        .unwrap_or(false)
}

/// Converte o erro do sqlx, separando a corrida perdida do resto.
pub(crate) fn map_conflict(err: sqlx::Error, what: impl Into<String>) -> AppError {
    if is_unique_violation(&err) {
        return AppError::UniqueConstraintViolation(what.into());
    }
    err.into()
}

/// Os contadores do Postgres voltam como i64; as colunas de métricas são INT.
pub(crate) fn clamp_count(value: i64) -> i32 {
    value.clamp(0, i32::MAX as i64) as i32
}
