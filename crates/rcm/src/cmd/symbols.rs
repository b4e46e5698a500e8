use rcm_server::SymbolTable;

use crate::builtins::builtin_fxns;
use crate::cmd::SymbolsArgs;
use crate::exit::{rcm_error, CliResult, SUCCESS};
use crate::output::{print_symbols, OutputFormat, SymbolRow};

pub fn run(_args: SymbolsArgs, format: OutputFormat) -> CliResult<i32> {
    let table =
        SymbolTable::new(builtin_fxns()).map_err(|err| rcm_error("symbol table", err))?;

    let rows: Vec<SymbolRow> = table
        .static_symbols()
        .into_iter()
        .map(|(name, index)| SymbolRow {
            name,
            index: format!("{index:#010x}"),
        })
        .collect();
    print_symbols(&rows, format);

    Ok(SUCCESS)
}
