pub mod csv_output_adapter;
